//! creditsync Billing
//!
//! Reconciles Stripe billing events with the internal credit ledger and
//! subscription records:
//! - Webhook signature verification and event classification
//! - Exactly-once credit grants for checkouts and subscription renewals
//! - Subscription lifecycle tracking (cancellation, pause, provider statuses)
//! - Checkout session creation and cancel-at-period-end requests
//! - Ledger auditing

use std::sync::Arc;

use creditsync_shared::{CreditAccount, CreditTransaction, Subscription, UserId};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

pub mod cancellation;
pub mod checkout;
pub mod classifier;
pub mod client;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod ledger;
pub mod provider;
pub mod reconcile;
pub mod signature;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cancellation::CancellationService;
pub use checkout::{CheckoutConfig, CheckoutRequest, CheckoutService};
pub use classifier::{classify, ClassifyError, InitialGrant, Intent, RenewalGrant};
pub use client::{StripeClient, StripeConfig};
pub use error::{BillingError, BillingResult};
pub use events::ProviderEvent;
pub use idempotency::{EventKey, IntentKind};
pub use ledger::{audit_ledger, LedgerAuditReport, LedgerDrift};
pub use provider::{BillingProvider, CreatedCheckoutSession, ProviderSubscription};
pub use reconcile::{Outcome, ReconcileConfig, ReconciliationEngine};
pub use store::{BillingStore, MemoryBillingStore, PgBillingStore, StoreTx};

/// Number of ledger entries returned with a credit summary
pub const RECENT_TRANSACTIONS_LIMIT: i64 = 20;

/// A user's balance, recent ledger entries and subscriptions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditSummary {
    pub account: CreditAccount,
    pub recent_transactions: Vec<CreditTransaction>,
    pub subscriptions: Vec<Subscription>,
}

/// Webhook verification settings
#[derive(Debug, Clone)]
struct WebhookConfig {
    secret: String,
    tolerance_secs: i64,
}

/// Main billing service that combines all billing functionality
pub struct BillingService {
    store: Arc<dyn BillingStore>,
    webhook: WebhookConfig,
    pub engine: ReconciliationEngine,
    pub checkout: CheckoutService,
    pub cancellation: CancellationService,
}

impl BillingService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        provider: Arc<dyn BillingProvider>,
        config: &StripeConfig,
    ) -> Self {
        Self {
            engine: ReconciliationEngine::new(
                store.clone(),
                provider.clone(),
                ReconcileConfig::from(config),
            ),
            checkout: CheckoutService::new(
                store.clone(),
                provider.clone(),
                CheckoutConfig::from(config),
            ),
            cancellation: CancellationService::new(provider),
            webhook: WebhookConfig {
                secret: config.webhook_secret.clone(),
                tolerance_secs: config.webhook_tolerance_secs,
            },
            store,
        }
    }

    /// Verify, parse and reconcile a raw webhook delivery
    pub async fn process_webhook(&self, payload: &str, signature: &str) -> BillingResult<Outcome> {
        signature::verify_signature(
            payload,
            signature,
            &self.webhook.secret,
            self.webhook.tolerance_secs,
            OffsetDateTime::now_utc().unix_timestamp(),
        )?;

        let event = ProviderEvent::from_payload(payload)?;

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Received Stripe webhook"
        );

        self.engine.handle_event(&event).await
    }

    pub async fn create_checkout(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<CreatedCheckoutSession> {
        self.checkout.create_checkout(request).await
    }

    pub async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<Value> {
        self.cancellation.cancel_at_period_end(subscription_id).await
    }

    /// Balance and history for a user; an account never granted credits reads as zero
    pub async fn credit_summary(&self, user_id: UserId) -> BillingResult<CreditSummary> {
        let account = self
            .store
            .account(user_id)
            .await?
            .unwrap_or_else(|| CreditAccount::empty(user_id, OffsetDateTime::now_utc()));
        let recent_transactions = self
            .store
            .recent_transactions(user_id, RECENT_TRANSACTIONS_LIMIT)
            .await?;
        let subscriptions = self.store.subscriptions_for_user(user_id).await?;

        Ok(CreditSummary {
            account,
            recent_transactions,
            subscriptions,
        })
    }

    /// Readiness of the backing store
    pub async fn ready(&self) -> BillingResult<()> {
        self.store.ping().await
    }

    pub async fn audit_ledger(&self) -> BillingResult<LedgerAuditReport> {
        ledger::audit_ledger(self.store.as_ref()).await
    }
}
