//! Stripe Checkout sessions
//!
//! Starts a purchase: creates the hosted checkout session at the provider and
//! records a `pending` payment transaction keyed by the session id. Credits
//! are only granted later, when `checkout.session.completed` is reconciled.

use std::sync::Arc;

use creditsync_shared::{CheckoutMode, NewPaymentTransaction, PackageId, UserId};
use serde::Deserialize;

use crate::client::StripeConfig;
use crate::error::{BillingError, BillingResult};
use crate::provider::{BillingProvider, CheckoutSessionRequest, CreatedCheckoutSession};
use crate::store::BillingStore;

/// Checkout settings
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Lowercase ISO currency code
    pub currency: String,
    pub subscription_payment_method_code: String,
    pub one_time_payment_method_code: String,
}

impl CheckoutConfig {
    /// Payment method code for a checkout mode
    pub fn payment_method_code(&self, mode: CheckoutMode) -> &str {
        match mode {
            CheckoutMode::Subscription => &self.subscription_payment_method_code,
            CheckoutMode::Payment => &self.one_time_payment_method_code,
        }
    }
}

impl From<&StripeConfig> for CheckoutConfig {
    fn from(config: &StripeConfig) -> Self {
        Self {
            currency: config.currency.clone(),
            subscription_payment_method_code: config.subscription_payment_method_code.clone(),
            one_time_payment_method_code: config.one_time_payment_method_code.clone(),
        }
    }
}

/// A request to buy a credit package
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub package_id: PackageId,
    #[serde(default)]
    pub mode: CheckoutMode,
    pub success_url: String,
    pub cancel_url: String,
}

/// Checkout service for creating Stripe checkout sessions
pub struct CheckoutService {
    store: Arc<dyn BillingStore>,
    provider: Arc<dyn BillingProvider>,
    config: CheckoutConfig,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        provider: Arc<dyn BillingProvider>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Create a checkout session and its pending payment transaction
    pub async fn create_checkout(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<CreatedCheckoutSession> {
        if request.success_url.trim().is_empty() || request.cancel_url.trim().is_empty() {
            return Err(BillingError::InvalidInput(
                "success_url and cancel_url are required".to_string(),
            ));
        }

        let package = self
            .store
            .package(request.package_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or(BillingError::PackageNotFound(request.package_id))?;

        let code = self.config.payment_method_code(request.mode);
        let method = self
            .store
            .payment_method(code)
            .await?
            .filter(|m| m.is_active)
            .ok_or_else(|| BillingError::PaymentMethodNotFound(code.to_string()))?;

        let session = self
            .provider
            .create_checkout_session(&CheckoutSessionRequest {
                user_id: request.user_id,
                package: package.clone(),
                mode: request.mode,
                currency: self.config.currency.clone(),
                success_url: request.success_url,
                cancel_url: request.cancel_url,
            })
            .await?;

        let payment = self
            .store
            .insert_payment_transaction(NewPaymentTransaction {
                user_id: request.user_id,
                package_id: package.id,
                payment_method_id: method.id,
                amount_cents: package.price_cents,
                currency: self.config.currency.to_uppercase(),
                external_transaction_id: session.id.clone(),
            })
            .await?;

        tracing::info!(
            user_id = %request.user_id,
            package_id = %package.id,
            session_id = %session.id,
            payment_id = payment.id,
            mode = request.mode.as_str(),
            "Created checkout session"
        );

        Ok(session)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryBillingStore;
    use crate::testing::FakeProvider;
    use creditsync_shared::{CreditPackage, PaymentStatus};

    fn config() -> CheckoutConfig {
        CheckoutConfig {
            currency: "pln".to_string(),
            subscription_payment_method_code: "stripe_subscription".to_string(),
            one_time_payment_method_code: "stripe".to_string(),
        }
    }

    async fn service() -> (CheckoutService, Arc<MemoryBillingStore>, Arc<FakeProvider>) {
        let store = Arc::new(MemoryBillingStore::new());
        store
            .add_package(CreditPackage {
                id: PackageId(1),
                name: "100 credits".to_string(),
                credits: 100,
                price_cents: 2000,
                is_active: true,
            })
            .await;
        store
            .add_package(CreditPackage {
                id: PackageId(2),
                name: "Retired".to_string(),
                credits: 10,
                price_cents: 100,
                is_active: false,
            })
            .await;
        let provider = Arc::new(FakeProvider::new());
        let service = CheckoutService::new(store.clone(), provider.clone(), config());
        (service, store, provider)
    }

    fn request(package_id: i64, mode: CheckoutMode) -> CheckoutRequest {
        CheckoutRequest {
            user_id: UserId(42),
            package_id: PackageId(package_id),
            mode,
            success_url: "https://app.test/success".to_string(),
            cancel_url: "https://app.test/cancel".to_string(),
        }
    }

    #[test]
    fn test_payment_method_code_per_mode() {
        let config = config();
        assert_eq!(
            config.payment_method_code(CheckoutMode::Subscription),
            "stripe_subscription"
        );
        assert_eq!(config.payment_method_code(CheckoutMode::Payment), "stripe");
    }

    #[tokio::test]
    async fn test_checkout_records_pending_payment() {
        let (service, store, provider) = service().await;

        let session = service
            .create_checkout(request(1, CheckoutMode::Subscription))
            .await
            .unwrap();

        assert!(session.url.contains(&session.id));
        let payment = store.payment(&session.id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.amount_cents, 2000);
        assert_eq!(payment.currency, "PLN");
        assert_eq!(payment.user_id, UserId(42));

        let requests = provider.checkout_requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].mode, CheckoutMode::Subscription);
        assert_eq!(requests[0].package.credits, 100);
    }

    #[tokio::test]
    async fn test_one_time_checkout_uses_one_time_method() {
        let (service, store, _) = service().await;

        let session = service
            .create_checkout(request(1, CheckoutMode::Payment))
            .await
            .unwrap();

        let payment = store.payment(&session.id).await.unwrap();
        let method = store.payment_method("stripe").await.unwrap().unwrap();
        assert_eq!(payment.payment_method_id, method.id);
    }

    #[tokio::test]
    async fn test_unknown_or_inactive_package() {
        let (service, _, provider) = service().await;

        for package_id in [2, 99] {
            let err = service
                .create_checkout(request(package_id, CheckoutMode::Subscription))
                .await
                .unwrap_err();
            assert!(matches!(err, BillingError::PackageNotFound(_)));
        }
        assert!(provider.checkout_requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_mode_defaults_to_subscription() {
        let request: CheckoutRequest = serde_json::from_value(serde_json::json!({
            "user_id": 1,
            "package_id": 1,
            "success_url": "https://app.test/s",
            "cancel_url": "https://app.test/c",
        }))
        .unwrap();
        assert_eq!(request.mode, CheckoutMode::Subscription);
    }
}
