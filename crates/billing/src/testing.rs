//! Test doubles and event builders
//!
//! Compiled for this crate's tests and for dependents that enable the
//! `testing` feature.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use creditsync_shared::{PackageId, UserId};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::error::{BillingError, BillingResult};
use crate::events::{EventData, ProviderEvent};
use crate::provider::{
    BillingProvider, CheckoutSessionRequest, CreatedCheckoutSession, ProviderSubscription,
};

/// In-memory [`BillingProvider`]
#[derive(Default)]
pub struct FakeProvider {
    subscriptions: Mutex<HashMap<String, Value>>,
    cancel_requests: Mutex<Vec<String>>,
    checkout_requests: Mutex<Vec<CheckoutSessionRequest>>,
    retrievals: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a provider subscription
    pub async fn set_subscription(&self, id: &str, status: &str, current_period_end: i64) {
        self.subscriptions.lock().await.insert(
            id.to_string(),
            json!({
                "id": id,
                "object": "subscription",
                "status": status,
                "cancel_at_period_end": false,
                "current_period_end": current_period_end,
            }),
        );
    }

    pub async fn cancel_requests(&self) -> Vec<String> {
        self.cancel_requests.lock().await.clone()
    }

    pub async fn checkout_requests(&self) -> Vec<CheckoutSessionRequest> {
        self.checkout_requests.lock().await.clone()
    }

    pub fn retrievals(&self) -> usize {
        self.retrievals.load(Ordering::SeqCst)
    }
}

fn no_such_subscription(id: &str) -> BillingError {
    BillingError::StripeApi(format!("No such subscription: '{}'", id))
}

#[async_trait]
impl BillingProvider for FakeProvider {
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        let snapshot = self
            .subscriptions
            .lock()
            .await
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| no_such_subscription(subscription_id))?;
        ProviderSubscription::from_snapshot(snapshot)
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> BillingResult<Value> {
        let mut subscriptions = self.subscriptions.lock().await;
        let subscription = subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| no_such_subscription(subscription_id))?;
        subscription["cancel_at_period_end"] = Value::Bool(true);
        self.cancel_requests
            .lock()
            .await
            .push(subscription_id.to_string());
        Ok(subscription.clone())
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<CreatedCheckoutSession> {
        let mut requests = self.checkout_requests.lock().await;
        requests.push(request.clone());
        let id = format!("cs_test_{}", requests.len());
        Ok(CreatedCheckoutSession {
            url: format!("https://checkout.stripe.test/c/pay/{}", id),
            id,
        })
    }
}

/// Wrap an object in an event envelope
pub fn event(event_id: &str, event_type: &str, object: Value) -> ProviderEvent {
    ProviderEvent {
        id: event_id.to_string(),
        event_type: event_type.to_string(),
        created: 1_700_000_000,
        data: EventData { object },
    }
}

/// `checkout.session.completed` for a subscription-mode session
pub fn subscription_checkout_completed(
    event_id: &str,
    session_id: &str,
    subscription_id: &str,
    user_id: UserId,
    package_id: PackageId,
    credits: i64,
    amount_total: i64,
) -> ProviderEvent {
    event(
        event_id,
        "checkout.session.completed",
        json!({
            "id": session_id,
            "object": "checkout.session",
            "mode": "subscription",
            "subscription": subscription_id,
            "amount_total": amount_total,
            "currency": "pln",
            "metadata": {
                "user_id": user_id.to_string(),
                "package_id": package_id.to_string(),
                "credits": credits.to_string(),
            },
        }),
    )
}

/// `checkout.session.completed` for a one-time purchase
pub fn payment_checkout_completed(
    event_id: &str,
    session_id: &str,
    user_id: UserId,
    package_id: PackageId,
    credits: i64,
    amount_total: i64,
) -> ProviderEvent {
    event(
        event_id,
        "checkout.session.completed",
        json!({
            "id": session_id,
            "object": "checkout.session",
            "mode": "payment",
            "subscription": null,
            "amount_total": amount_total,
            "currency": "pln",
            "metadata": {
                "user_id": user_id.to_string(),
                "package_id": package_id.to_string(),
                "credits": credits.to_string(),
            },
        }),
    )
}

/// A paid invoice event (`invoice.paid` or `invoice.payment_succeeded`)
pub fn invoice_paid(
    event_id: &str,
    event_type: &str,
    invoice_id: &str,
    subscription_id: &str,
    billing_reason: &str,
    amount_paid: i64,
) -> ProviderEvent {
    event(
        event_id,
        event_type,
        json!({
            "id": invoice_id,
            "object": "invoice",
            "subscription": subscription_id,
            "billing_reason": billing_reason,
            "amount_paid": amount_paid,
        }),
    )
}

/// A `customer.subscription.*` event
pub fn subscription_event(
    event_id: &str,
    event_type: &str,
    subscription_id: &str,
    status: &str,
) -> ProviderEvent {
    event(
        event_id,
        event_type,
        json!({
            "id": subscription_id,
            "object": "subscription",
            "status": status,
        }),
    )
}
