//! Stripe client configuration
//!
//! [`StripeClient`] is the production [`BillingProvider`].

use std::collections::HashMap;

use async_trait::async_trait;
use creditsync_shared::CheckoutMode;
use serde_json::Value;
use stripe::{
    CheckoutSession, CheckoutSessionMode, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData,
    CreateCheckoutSessionLineItemsPriceDataRecurring,
    CreateCheckoutSessionLineItemsPriceDataRecurringInterval,
    CreateCheckoutSessionSubscriptionData, Currency, Subscription, SubscriptionId,
    UpdateSubscription,
};

use crate::error::{BillingError, BillingResult};
use crate::provider::{
    BillingProvider, CheckoutSessionRequest, CreatedCheckoutSession, ProviderSubscription,
};

/// Default signature timestamp tolerance (5 minutes)
pub const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret
    pub webhook_secret: String,
    /// Maximum age of a signed webhook, in seconds
    pub webhook_tolerance_secs: i64,
    /// Lowercase ISO currency for checkout sessions
    pub currency: String,
    /// `payment_methods.code` recorded for recurring subscriptions
    pub subscription_payment_method_code: String,
    /// `payment_methods.code` recorded for one-time purchases
    pub one_time_payment_method_code: String,
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

fn parse_subscription_id(subscription_id: &str) -> BillingResult<SubscriptionId> {
    subscription_id
        .parse::<SubscriptionId>()
        .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))
}

fn to_snapshot(subscription: &Subscription) -> BillingResult<Value> {
    serde_json::to_value(subscription)
        .map_err(|e| BillingError::Internal(format!("Failed to serialize subscription: {}", e)))
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        let sub_id = parse_subscription_id(subscription_id)?;
        let subscription = Subscription::retrieve(self.inner(), &sub_id, &[]).await?;
        ProviderSubscription::from_snapshot(to_snapshot(&subscription)?)
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> BillingResult<Value> {
        let sub_id = parse_subscription_id(subscription_id)?;

        let params = UpdateSubscription {
            cancel_at_period_end: Some(true),
            ..Default::default()
        };
        let subscription = Subscription::update(self.inner(), &sub_id, params).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            cancel_at_period_end = subscription.cancel_at_period_end,
            "Requested subscription cancellation at period end"
        );

        to_snapshot(&subscription)
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<CreatedCheckoutSession> {
        let currency: Currency =
            serde_json::from_value(Value::String(request.currency.to_lowercase())).map_err(
                |_| BillingError::Config(format!("Unsupported currency: {}", request.currency)),
            )?;

        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), request.user_id.to_string());
        metadata.insert("package_id".to_string(), request.package.id.to_string());
        metadata.insert("credits".to_string(), request.package.credits.to_string());

        let (mode, recurring, subscription_data) = match request.mode {
            CheckoutMode::Subscription => (
                CheckoutSessionMode::Subscription,
                Some(CreateCheckoutSessionLineItemsPriceDataRecurring {
                    interval: CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Month,
                    interval_count: None,
                }),
                // Mirror the metadata onto the subscription so renewals can be traced
                Some(CreateCheckoutSessionSubscriptionData {
                    metadata: Some(metadata.clone()),
                    ..Default::default()
                }),
            ),
            CheckoutMode::Payment => (CheckoutSessionMode::Payment, None, None),
        };

        let description = match request.mode {
            CheckoutMode::Subscription => {
                format!("{} credits - Monthly Subscription", request.package.credits)
            }
            CheckoutMode::Payment => format!("{} credits", request.package.credits),
        };

        let line_item = CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency,
                unit_amount: Some(request.package.price_cents),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: request.package.name.clone(),
                    description: Some(description),
                    ..Default::default()
                }),
                recurring,
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        };

        let client_reference_id = request.user_id.to_string();
        let params = CreateCheckoutSession {
            mode: Some(mode),
            line_items: Some(vec![line_item]),
            success_url: Some(&request.success_url),
            cancel_url: Some(&request.cancel_url),
            client_reference_id: Some(&client_reference_id),
            metadata: Some(metadata),
            subscription_data,
            ..Default::default()
        };

        let session = CheckoutSession::create(self.inner(), params).await?;
        let url = session.url.clone().ok_or_else(|| {
            BillingError::StripeApi(format!("Checkout session {} has no URL", session.id))
        })?;

        Ok(CreatedCheckoutSession {
            id: session.id.to_string(),
            url,
        })
    }
}
