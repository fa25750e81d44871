//! Customer-initiated subscription cancellation
//!
//! Only asks the provider to stop renewing at the end of the current period.
//! The local subscription row changes when the resulting
//! `customer.subscription.*` events are reconciled.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{BillingError, BillingResult};
use crate::provider::BillingProvider;

pub struct CancellationService {
    provider: Arc<dyn BillingProvider>,
}

impl CancellationService {
    pub fn new(provider: Arc<dyn BillingProvider>) -> Self {
        Self { provider }
    }

    /// Request cancellation at period end; returns the provider's subscription object
    pub async fn cancel_at_period_end(&self, subscription_id: &str) -> BillingResult<Value> {
        let subscription_id = subscription_id.trim();
        if subscription_id.is_empty() {
            return Err(BillingError::InvalidInput(
                "Subscription ID is required".to_string(),
            ));
        }

        let subscription = self.provider.cancel_at_period_end(subscription_id).await?;

        tracing::info!(
            subscription_id = %subscription_id,
            "Subscription set to cancel at period end"
        );

        Ok(subscription)
    }
}
