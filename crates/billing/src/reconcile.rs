//! Billing event reconciliation
//!
//! Applies classified provider events to the credit ledger and subscription
//! records. Each event is applied inside a single store transaction that
//! starts by claiming the event's idempotency key; a failed attempt rolls the
//! claim back with everything else.
//!
//! Provider lookups (current period end, snapshot) happen before the
//! transaction is opened so no row lock is held across a network call.

use std::sync::Arc;

use creditsync_shared::{
    CheckoutMode, CreditTransactionKind, NewSubscription, SubscriptionStatus, UserId,
};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::classifier::{classify, InitialGrant, Intent, RenewalGrant};
use crate::client::StripeConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::ProviderEvent;
use crate::idempotency::EventKey;
use crate::ledger::{self, Grant};
use crate::provider::{BillingProvider, ProviderSubscription};
use crate::store::{BillingStore, StoreTx};

/// Engine settings
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// `payment_methods.code` recorded on subscriptions created by checkout
    pub subscription_payment_method_code: String,
}

impl From<&StripeConfig> for ReconcileConfig {
    fn from(config: &StripeConfig) -> Self {
        Self {
            subscription_payment_method_code: config.subscription_payment_method_code.clone(),
        }
    }
}

/// What reconciling an event did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    CreditsGranted {
        user_id: UserId,
        kind: CreditTransactionKind,
        credits: i64,
        balance_after: i64,
    },
    SubscriptionCancelled {
        subscription_id: String,
    },
    StatusUpdated {
        subscription_id: String,
        status: SubscriptionStatus,
    },
    /// A status change that would revive a cancelled subscription
    StaleStatusRejected {
        subscription_id: String,
        attempted: SubscriptionStatus,
    },
    UnknownSubscription {
        subscription_id: String,
    },
    NotRenewalCycle {
        invoice_id: String,
        billing_reason: String,
    },
    Duplicate {
        key: EventKey,
    },
    Ignored {
        event_type: String,
    },
}

/// Billing event reconciliation engine
pub struct ReconciliationEngine {
    store: Arc<dyn BillingStore>,
    provider: Arc<dyn BillingProvider>,
    config: ReconcileConfig,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn BillingStore>,
        provider: Arc<dyn BillingProvider>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Classify and reconcile a verified provider event
    pub async fn handle_event(&self, event: &ProviderEvent) -> BillingResult<Outcome> {
        let intent = classify(event).map_err(|e| {
            tracing::error!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "Failed to classify billing event"
            );
            BillingError::from(e)
        })?;

        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            intent = intent.name(),
            "Classified billing event"
        );

        self.reconcile(&event.id, intent).await
    }

    /// Apply an intent exactly once
    pub async fn reconcile(&self, event_id: &str, intent: Intent) -> BillingResult<Outcome> {
        match intent {
            Intent::Ignored { event_type } => {
                tracing::info!(
                    event_id = %event_id,
                    event_type = %event_type,
                    "Ignoring unhandled billing event"
                );
                Ok(Outcome::Ignored { event_type })
            }
            Intent::RenewalGrant(renewal) if !renewal.is_subscription_cycle() => {
                tracing::info!(
                    event_id = %event_id,
                    invoice_id = %renewal.invoice_id,
                    subscription_id = %renewal.subscription_id,
                    billing_reason = %renewal.billing_reason,
                    "Skipping non-renewal invoice"
                );
                Ok(Outcome::NotRenewalCycle {
                    invoice_id: renewal.invoice_id,
                    billing_reason: renewal.billing_reason,
                })
            }
            intent => {
                let key = EventKey::for_intent(event_id, &intent).ok_or_else(|| {
                    BillingError::Internal(format!("intent {} has no event key", intent.name()))
                })?;
                self.apply(event_id, key, intent).await
            }
        }
    }

    async fn apply(&self, event_id: &str, key: EventKey, intent: Intent) -> BillingResult<Outcome> {
        let needs_provider = matches!(
            &intent,
            Intent::InitialGrant(InitialGrant {
                mode: CheckoutMode::Subscription,
                ..
            }) | Intent::RenewalGrant(_)
        );

        // Redeliveries skip the provider round trip
        if needs_provider && self.store.is_claimed(&key).await? {
            tracing::info!(
                event_id = %event_id,
                key = %key,
                "Billing event already reconciled, skipping duplicate"
            );
            return Ok(Outcome::Duplicate { key });
        }

        let provider_subscription = match &intent {
            Intent::InitialGrant(InitialGrant {
                mode: CheckoutMode::Subscription,
                subscription_id: Some(subscription_id),
                ..
            }) => Some(self.provider.retrieve_subscription(subscription_id).await?),
            Intent::RenewalGrant(renewal) => Some(
                self.provider
                    .retrieve_subscription(&renewal.subscription_id)
                    .await?,
            ),
            _ => None,
        };

        let mut tx = self.store.begin().await?;

        if !tx.try_claim(&key, event_id).await? {
            tracing::info!(
                event_id = %event_id,
                key = %key,
                "Billing event already reconciled, skipping duplicate"
            );
            return Ok(Outcome::Duplicate { key });
        }

        let now = OffsetDateTime::now_utc();
        let outcome = match intent {
            Intent::InitialGrant(grant) => {
                self.apply_initial_grant(&mut *tx, grant, provider_subscription, now)
                    .await?
            }
            Intent::RenewalGrant(renewal) => {
                let provider_subscription = provider_subscription.ok_or_else(|| {
                    BillingError::Internal("renewal without provider subscription".to_string())
                })?;
                self.apply_renewal(&mut *tx, renewal, provider_subscription, now)
                    .await?
            }
            Intent::Cancelled {
                subscription_id,
                snapshot,
            } => self
                .apply_cancellation(&mut *tx, subscription_id, snapshot, now)
                .await?,
            Intent::StatusChanged {
                subscription_id,
                provider_status,
                status,
                snapshot,
            } => {
                self.apply_status_change(
                    &mut *tx,
                    subscription_id,
                    &provider_status,
                    status,
                    snapshot,
                    now,
                )
                .await?
            }
            Intent::Ignored { event_type } => Outcome::Ignored { event_type },
        };

        tx.commit().await?;

        tracing::info!(event_id = %event_id, key = %key, outcome = ?outcome, "Reconciled billing event");
        Ok(outcome)
    }

    async fn apply_initial_grant(
        &self,
        tx: &mut dyn StoreTx,
        grant: InitialGrant,
        provider_subscription: Option<ProviderSubscription>,
        now: OffsetDateTime,
    ) -> BillingResult<Outcome> {
        match tx.complete_payment(&grant.session_id).await? {
            Some(payment) => tracing::debug!(
                payment_id = payment.id,
                session_id = %grant.session_id,
                "Marked payment transaction completed"
            ),
            None => tracing::warn!(
                session_id = %grant.session_id,
                user_id = %grant.user_id,
                "No payment transaction recorded for checkout session"
            ),
        }

        let kind = match grant.mode {
            CheckoutMode::Subscription => CreditTransactionKind::SubscriptionInitial,
            CheckoutMode::Payment => CreditTransactionKind::Purchase,
        };

        if grant.mode == CheckoutMode::Subscription {
            let subscription = provider_subscription.ok_or_else(|| {
                BillingError::MalformedEvent(format!(
                    "checkout session {} has no subscription",
                    grant.session_id
                ))
            })?;
            self.create_subscription(tx, &grant, subscription).await?;
        }

        let balance_after = apply_grant(
            tx,
            Grant::new(grant.user_id, kind, grant.credits, grant.amount_paid_cents),
            now,
        )
        .await?;

        tracing::info!(
            user_id = %grant.user_id,
            session_id = %grant.session_id,
            credits = grant.credits,
            balance_after = balance_after,
            mode = grant.mode.as_str(),
            "Granted credits for completed checkout"
        );

        Ok(Outcome::CreditsGranted {
            user_id: grant.user_id,
            kind,
            credits: grant.credits,
            balance_after,
        })
    }

    async fn create_subscription(
        &self,
        tx: &mut dyn StoreTx,
        grant: &InitialGrant,
        subscription: ProviderSubscription,
    ) -> BillingResult<()> {
        let code = &self.config.subscription_payment_method_code;
        let method = tx
            .find_payment_method(code)
            .await?
            .ok_or_else(|| BillingError::PaymentMethodNotFound(code.clone()))?;

        if tx.find_package(grant.package_id).await?.is_none() {
            return Err(BillingError::PackageNotFound(grant.package_id));
        }

        let created = tx
            .insert_subscription(NewSubscription {
                user_id: grant.user_id,
                package_id: grant.package_id,
                payment_method_id: method.id,
                external_subscription_id: subscription.id,
                status: SubscriptionStatus::Active,
                next_billing_at: subscription.current_period_end,
                snapshot: subscription.snapshot,
            })
            .await?;

        tracing::info!(
            user_id = %grant.user_id,
            subscription_id = %created.external_subscription_id,
            next_billing_at = %created.next_billing_at,
            "Created subscription"
        );
        Ok(())
    }

    async fn apply_renewal(
        &self,
        tx: &mut dyn StoreTx,
        renewal: RenewalGrant,
        provider_subscription: ProviderSubscription,
        now: OffsetDateTime,
    ) -> BillingResult<Outcome> {
        let mut subscription = tx
            .find_subscription(&renewal.subscription_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(renewal.subscription_id.clone()))?;

        let package = tx
            .find_package(subscription.package_id)
            .await?
            .ok_or(BillingError::PackageNotFound(subscription.package_id))?;

        let balance_after = apply_grant(
            tx,
            Grant::new(
                subscription.user_id,
                CreditTransactionKind::SubscriptionRenewal,
                package.credits,
                renewal.amount_paid_cents,
            ),
            now,
        )
        .await?;

        subscription.next_billing_at = provider_subscription.current_period_end;
        subscription.snapshot = provider_subscription.snapshot;
        tx.update_subscription(&subscription).await?;

        tracing::info!(
            user_id = %subscription.user_id,
            subscription_id = %renewal.subscription_id,
            invoice_id = %renewal.invoice_id,
            credits = package.credits,
            balance_after = balance_after,
            next_billing_at = %subscription.next_billing_at,
            "Granted subscription renewal credits"
        );

        Ok(Outcome::CreditsGranted {
            user_id: subscription.user_id,
            kind: CreditTransactionKind::SubscriptionRenewal,
            credits: package.credits,
            balance_after,
        })
    }

    async fn apply_cancellation(
        &self,
        tx: &mut dyn StoreTx,
        subscription_id: String,
        snapshot: Value,
        now: OffsetDateTime,
    ) -> BillingResult<Outcome> {
        let Some(mut subscription) = tx.find_subscription(&subscription_id).await? else {
            tracing::warn!(
                subscription_id = %subscription_id,
                "Cancellation for unknown subscription"
            );
            return Ok(Outcome::UnknownSubscription { subscription_id });
        };

        subscription.status = SubscriptionStatus::Cancelled;
        subscription.end_at = Some(now);
        subscription.snapshot = snapshot;
        tx.update_subscription(&subscription).await?;

        tracing::info!(
            user_id = %subscription.user_id,
            subscription_id = %subscription_id,
            "Subscription cancelled"
        );

        Ok(Outcome::SubscriptionCancelled { subscription_id })
    }

    async fn apply_status_change(
        &self,
        tx: &mut dyn StoreTx,
        subscription_id: String,
        provider_status: &str,
        status: SubscriptionStatus,
        snapshot: Value,
        now: OffsetDateTime,
    ) -> BillingResult<Outcome> {
        let Some(mut subscription) = tx.find_subscription(&subscription_id).await? else {
            tracing::warn!(
                subscription_id = %subscription_id,
                provider_status = %provider_status,
                "Status change for unknown subscription"
            );
            return Ok(Outcome::UnknownSubscription { subscription_id });
        };

        // Provider cancellation is terminal
        if subscription.status.is_cancelled() && !status.is_cancelled() {
            tracing::warn!(
                subscription_id = %subscription_id,
                current = %subscription.status,
                attempted = %status,
                "Rejecting stale status change for cancelled subscription"
            );
            return Ok(Outcome::StaleStatusRejected {
                subscription_id,
                attempted: status,
            });
        }

        if status.is_cancelled() && subscription.end_at.is_none() {
            subscription.end_at = Some(now);
        }
        subscription.status = status.clone();
        subscription.snapshot = snapshot;
        tx.update_subscription(&subscription).await?;

        tracing::info!(
            user_id = %subscription.user_id,
            subscription_id = %subscription_id,
            status = %status,
            "Subscription status updated"
        );

        Ok(Outcome::StatusUpdated {
            subscription_id,
            status,
        })
    }
}

/// Append the ledger entry and update the locked account
async fn apply_grant(tx: &mut dyn StoreTx, grant: Grant, now: OffsetDateTime) -> BillingResult<i64> {
    let account = tx.lock_account(grant.user_id).await?;
    let plan = ledger::plan_grant(&account, &grant, now)?;
    let entry = tx.append_transaction(plan.entry).await?;
    tx.save_account(&plan.account).await?;
    Ok(entry.balance_after)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryBillingStore;
    use crate::testing::{
        invoice_paid, payment_checkout_completed, subscription_checkout_completed,
        subscription_event, FakeProvider,
    };
    use creditsync_shared::{
        CreditPackage, NewPaymentTransaction, PackageId, PaymentMethodId, PaymentStatus,
    };

    const PERIOD_1: i64 = 1_702_000_000;
    const PERIOD_2: i64 = 1_704_600_000;
    const USER: UserId = UserId(42);
    const PACKAGE: PackageId = PackageId(1);

    struct Harness {
        store: Arc<MemoryBillingStore>,
        provider: Arc<FakeProvider>,
        engine: Arc<ReconciliationEngine>,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryBillingStore::new());
        store
            .add_package(CreditPackage {
                id: PACKAGE,
                name: "100 credits".to_string(),
                credits: 100,
                price_cents: 2000,
                is_active: true,
            })
            .await;
        let provider = Arc::new(FakeProvider::new());
        provider.set_subscription("sub_1", "active", PERIOD_1).await;

        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            provider.clone(),
            ReconcileConfig {
                subscription_payment_method_code: "stripe_subscription".to_string(),
            },
        ));
        Harness {
            store,
            provider,
            engine,
        }
    }

    async fn subscribe(h: &Harness) -> Outcome {
        h.engine
            .handle_event(&subscription_checkout_completed(
                "evt_checkout", "cs_1", "sub_1", USER, PACKAGE, 100, 2000,
            ))
            .await
            .unwrap()
    }

    async fn balance(h: &Harness) -> i64 {
        h.store
            .account(USER)
            .await
            .unwrap()
            .map(|a| a.balance)
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_initial_grant_for_new_user() {
        let h = harness().await;
        h.store
            .insert_payment_transaction(NewPaymentTransaction {
                user_id: USER,
                package_id: PACKAGE,
                payment_method_id: PaymentMethodId(2),
                amount_cents: 2000,
                currency: "PLN".to_string(),
                external_transaction_id: "cs_1".to_string(),
            })
            .await
            .unwrap();

        let outcome = subscribe(&h).await;

        assert_eq!(
            outcome,
            Outcome::CreditsGranted {
                user_id: USER,
                kind: CreditTransactionKind::SubscriptionInitial,
                credits: 100,
                balance_after: 100,
            }
        );

        let account = h.store.account(USER).await.unwrap().unwrap();
        assert_eq!(account.balance, 100);
        assert_eq!(account.lifetime_purchased, 100);
        assert_eq!(account.lifetime_spent_cents, 2000);
        assert!(account.last_purchase_at.is_some());

        let entries = h.store.ledger_entries(USER).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, CreditTransactionKind::SubscriptionInitial);
        assert_eq!((entries[0].balance_before, entries[0].balance_after), (0, 100));

        let subscription = h.store.subscription("sub_1").await.unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert_eq!(subscription.user_id, USER);
        assert_eq!(subscription.next_billing_at.unix_timestamp(), PERIOD_1);
        assert_eq!(subscription.snapshot["id"], "sub_1");

        let payment = h.store.payment("cs_1").await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_initial_grant_redelivery_is_a_duplicate() {
        let h = harness().await;
        subscribe(&h).await;

        let outcome = subscribe(&h).await;

        assert!(matches!(outcome, Outcome::Duplicate { .. }));
        assert_eq!(balance(&h).await, 100);
        assert_eq!(h.store.all_transactions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_one_time_purchase() {
        let h = harness().await;
        let outcome = h
            .engine
            .handle_event(&payment_checkout_completed("evt_p", "cs_p", USER, PACKAGE, 50, 1000))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            Outcome::CreditsGranted {
                kind: CreditTransactionKind::Purchase,
                balance_after: 50,
                ..
            }
        ));
        assert_eq!(h.provider.retrievals(), 0);
        assert!(h.store.subscriptions_for_user(USER).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_renewal_adds_credits_and_advances_cursor() {
        let h = harness().await;
        subscribe(&h).await;
        h.provider.set_subscription("sub_1", "active", PERIOD_2).await;

        let outcome = h
            .engine
            .handle_event(&invoice_paid(
                "evt_inv", "invoice.paid", "in_2", "sub_1", "subscription_cycle", 2000,
            ))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            Outcome::CreditsGranted {
                kind: CreditTransactionKind::SubscriptionRenewal,
                credits: 100,
                balance_after: 200,
                ..
            }
        ));
        let entries = h.store.ledger_entries(USER).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[1].balance_before, entries[1].balance_after), (100, 200));

        let subscription = h.store.subscription("sub_1").await.unwrap();
        assert_eq!(subscription.next_billing_at.unix_timestamp(), PERIOD_2);
        assert_eq!(h.store.account(USER).await.unwrap().unwrap().lifetime_spent_cents, 4000);
    }

    #[tokio::test]
    async fn test_both_invoice_events_grant_once() {
        let h = harness().await;
        subscribe(&h).await;

        for (event_id, event_type) in [
            ("evt_a", "invoice.payment_succeeded"),
            ("evt_b", "invoice.paid"),
        ] {
            h.engine
                .handle_event(&invoice_paid(
                    event_id, event_type, "in_2", "sub_1", "subscription_cycle", 2000,
                ))
                .await
                .unwrap();
        }

        assert_eq!(balance(&h).await, 200);
    }

    #[tokio::test]
    async fn test_redelivery_skips_provider_lookup() {
        let h = harness().await;
        subscribe(&h).await;
        let renewal = invoice_paid(
            "evt_inv", "invoice.paid", "in_2", "sub_1", "subscription_cycle", 2000,
        );
        h.engine.handle_event(&renewal).await.unwrap();
        let retrievals = h.provider.retrievals();

        let outcome = h.engine.handle_event(&renewal).await.unwrap();
        assert!(matches!(outcome, Outcome::Duplicate { .. }));
        let outcome = subscribe(&h).await;
        assert!(matches!(outcome, Outcome::Duplicate { .. }));

        assert_eq!(h.provider.retrievals(), retrievals);
        assert_eq!(balance(&h).await, 200);
    }

    #[tokio::test]
    async fn test_first_cycle_invoice_grants_nothing() {
        let h = harness().await;
        subscribe(&h).await;
        let claims = h.store.claim_count().await;

        let outcome = h
            .engine
            .handle_event(&invoice_paid(
                "evt_first", "invoice.paid", "in_1", "sub_1", "subscription_create", 2000,
            ))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::NotRenewalCycle {
                invoice_id: "in_1".to_string(),
                billing_reason: "subscription_create".to_string(),
            }
        );
        assert_eq!(balance(&h).await, 100);
        assert_eq!(h.store.claim_count().await, claims);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_renewals_grant_once() {
        let h = harness().await;
        subscribe(&h).await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .handle_event(&invoice_paid(
                        &format!("evt_{}", i),
                        "invoice.paid",
                        "in_2",
                        "sub_1",
                        "subscription_cycle",
                        2000,
                    ))
                    .await
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if let Outcome::CreditsGranted { .. } = handle.await.unwrap().unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 1);
        assert_eq!(balance(&h).await, 200);
    }

    #[tokio::test]
    async fn test_renewal_for_unknown_subscription_fails_without_claim() {
        let h = harness().await;
        h.provider.set_subscription("sub_x", "active", PERIOD_2).await;

        let err = h
            .engine
            .handle_event(&invoice_paid(
                "evt_x", "invoice.paid", "in_x", "sub_x", "subscription_cycle", 2000,
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::SubscriptionNotFound(ref id) if id == "sub_x"));
        assert_eq!(h.store.claim_count().await, 0);
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_no_trace() {
        let h = harness().await;
        let err = h
            .engine
            .handle_event(&subscription_checkout_completed(
                "evt_c", "cs_9", "sub_missing", USER, PACKAGE, 100, 2000,
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::StripeApi(_)));
        assert_eq!(h.store.claim_count().await, 0);
        assert_eq!(h.store.account(USER).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_payment_method_rolls_back_grant() {
        let h = harness().await;
        h.store.remove_payment_method("stripe_subscription").await;

        let err = subscribe_err(&h).await;

        assert!(matches!(err, BillingError::PaymentMethodNotFound(_)));
        assert_eq!(h.store.account(USER).await.unwrap(), None);
        assert_eq!(h.store.claim_count().await, 0);
    }

    async fn subscribe_err(h: &Harness) -> BillingError {
        h.engine
            .handle_event(&subscription_checkout_completed(
                "evt_checkout", "cs_1", "sub_1", USER, PACKAGE, 100, 2000,
            ))
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn test_cancellation() {
        let h = harness().await;
        subscribe(&h).await;

        let outcome = h
            .engine
            .handle_event(&subscription_event(
                "evt_del",
                "customer.subscription.deleted",
                "sub_1",
                "canceled",
            ))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::SubscriptionCancelled {
                subscription_id: "sub_1".to_string()
            }
        );
        let subscription = h.store.subscription("sub_1").await.unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::Cancelled);
        assert!(subscription.end_at.is_some());
        assert_eq!(subscription.snapshot["status"], "canceled");
        assert_eq!(h.store.all_transactions().await.len(), 1);
        assert_eq!(balance(&h).await, 100);
    }

    #[tokio::test]
    async fn test_paused_and_verbatim_statuses() {
        let h = harness().await;
        subscribe(&h).await;

        h.engine
            .handle_event(&subscription_event(
                "evt_1",
                "customer.subscription.paused",
                "sub_1",
                "paused",
            ))
            .await
            .unwrap();
        assert_eq!(
            h.store.subscription("sub_1").await.unwrap().status,
            SubscriptionStatus::Paused
        );

        h.engine
            .handle_event(&subscription_event(
                "evt_2",
                "customer.subscription.updated",
                "sub_1",
                "past_due",
            ))
            .await
            .unwrap();
        let subscription = h.store.subscription("sub_1").await.unwrap();
        assert_eq!(subscription.status.as_str(), "past_due");
        assert_eq!(subscription.end_at, None);
    }

    #[tokio::test]
    async fn test_canceled_status_change_sets_end_date() {
        let h = harness().await;
        subscribe(&h).await;

        h.engine
            .handle_event(&subscription_event(
                "evt_1",
                "customer.subscription.updated",
                "sub_1",
                "canceled",
            ))
            .await
            .unwrap();

        let subscription = h.store.subscription("sub_1").await.unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::Cancelled);
        assert!(subscription.end_at.is_some());
    }

    #[tokio::test]
    async fn test_stale_update_cannot_revive_cancelled_subscription() {
        let h = harness().await;
        subscribe(&h).await;
        h.engine
            .handle_event(&subscription_event(
                "evt_del",
                "customer.subscription.deleted",
                "sub_1",
                "canceled",
            ))
            .await
            .unwrap();

        let outcome = h
            .engine
            .handle_event(&subscription_event(
                "evt_old",
                "customer.subscription.updated",
                "sub_1",
                "active",
            ))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::StaleStatusRejected {
                subscription_id: "sub_1".to_string(),
                attempted: SubscriptionStatus::Active,
            }
        );
        assert_eq!(
            h.store.subscription("sub_1").await.unwrap().status,
            SubscriptionStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_unknown_subscription_is_acknowledged() {
        let h = harness().await;

        let outcome = h
            .engine
            .handle_event(&subscription_event(
                "evt_u",
                "customer.subscription.updated",
                "sub_unknown",
                "active",
            ))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::UnknownSubscription {
                subscription_id: "sub_unknown".to_string()
            }
        );
        assert_eq!(h.store.claim_count().await, 1);
    }

    #[tokio::test]
    async fn test_status_change_redelivery_is_a_duplicate() {
        let h = harness().await;
        subscribe(&h).await;
        let event = subscription_event(
            "evt_same",
            "customer.subscription.updated",
            "sub_1",
            "paused",
        );

        h.engine.handle_event(&event).await.unwrap();
        let outcome = h.engine.handle_event(&event).await.unwrap();

        assert!(matches!(outcome, Outcome::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_malformed_event_is_an_error() {
        let h = harness().await;
        let event = crate::testing::event(
            "evt_bad",
            "checkout.session.completed",
            serde_json::json!({"id": "cs_bad", "mode": "payment", "metadata": {}}),
        );

        let err = h.engine.handle_event(&event).await.unwrap_err();

        assert!(matches!(err, BillingError::MalformedEvent(_)));
    }
}
