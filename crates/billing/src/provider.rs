//! Billing provider seam
//!
//! The reconciliation engine, checkout and cancellation flows talk to the
//! upstream billing provider only through [`BillingProvider`]. Production uses
//! [`crate::StripeClient`]; tests substitute a fake.

use async_trait::async_trait;
use creditsync_shared::{CheckoutMode, CreditPackage, UserId};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

/// The parts of a provider subscription the engine relies on
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSubscription {
    pub id: String,
    /// Raw provider status (`active`, `canceled`, `past_due`, ...)
    pub status: String,
    pub current_period_end: OffsetDateTime,
    /// Full provider object, stored opaquely on the subscription row
    pub snapshot: Value,
}

impl ProviderSubscription {
    /// Extract the fields the engine needs from a provider subscription object
    pub fn from_snapshot(snapshot: Value) -> BillingResult<Self> {
        let id = snapshot
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| BillingError::MalformedEvent("subscription object has no id".to_string()))?
            .to_string();
        let status = snapshot
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BillingError::MalformedEvent(format!("subscription {} has no status", id))
            })?
            .to_string();
        let period_end = snapshot
            .get("current_period_end")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                BillingError::MalformedEvent(format!(
                    "subscription {} has no current_period_end",
                    id
                ))
            })?;
        let current_period_end = OffsetDateTime::from_unix_timestamp(period_end).map_err(|e| {
            BillingError::MalformedEvent(format!("subscription {} period end: {}", id, e))
        })?;

        Ok(Self {
            id,
            status,
            current_period_end,
            snapshot,
        })
    }
}

/// Parameters for a hosted checkout session
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub user_id: UserId,
    pub package: CreditPackage,
    pub mode: CheckoutMode,
    /// Lowercase ISO currency code
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// A created checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCheckoutSession {
    pub id: String,
    pub url: String,
}

/// Outbound operations against the billing provider
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Fetch the current state of a subscription
    async fn retrieve_subscription(&self, subscription_id: &str)
        -> BillingResult<ProviderSubscription>;

    /// Ask the provider to cancel at the end of the current period.
    /// Returns the provider's updated subscription object.
    async fn cancel_at_period_end(&self, subscription_id: &str) -> BillingResult<Value>;

    /// Create a hosted checkout session for a credit package
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<CreatedCheckoutSession>;
}
