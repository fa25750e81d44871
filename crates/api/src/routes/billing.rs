//! Billing routes

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    Json,
};
use creditsync_billing::{BillingError, CheckoutRequest, CreditSummary, Outcome};
use creditsync_shared::UserId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Handle Stripe webhooks
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    tracing::debug!(body_len = body.len(), "Stripe webhook received");

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            BillingError::WebhookSignatureInvalid("Missing stripe-signature header".to_string())
        })?;

    match state.billing.process_webhook(&body, signature).await {
        Ok(outcome) => {
            if let Outcome::Duplicate { key } = &outcome {
                tracing::info!(key = %key, "Acknowledged duplicate webhook");
            }
            Ok(Json(json!({ "received": true })))
        }
        Err(e @ BillingError::WebhookSignatureInvalid(_)) => {
            tracing::warn!(error = %e, "Stripe webhook signature verification failed");
            Err(e.into())
        }
        Err(e) => {
            tracing::error!(error = %e, "Webhook handling error");
            Err(e.into())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelSubscriptionRequest {
    #[serde(default)]
    pub subscription_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelSubscriptionResponse {
    pub success: bool,
    pub subscription: Value,
}

/// Cancel a subscription at the end of its current period
pub async fn cancel_subscription(
    State(state): State<AppState>,
    payload: Result<Json<CancelSubscriptionRequest>, JsonRejection>,
) -> ApiResult<Json<CancelSubscriptionResponse>> {
    let Json(req) = payload?;
    let subscription_id = req
        .subscription_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Subscription ID is required".to_string()))?;

    let subscription = state
        .billing
        .cancel_subscription(&subscription_id)
        .await
        .map_err(|e| {
            tracing::error!(subscription_id = %subscription_id, error = %e, "Failed to cancel subscription");
            ApiError::from(e)
        })?;

    Ok(Json(CancelSubscriptionResponse {
        success: true,
        subscription,
    }))
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

/// Create a checkout session for a credit package
pub async fn create_checkout(
    State(state): State<AppState>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> ApiResult<Json<CheckoutResponse>> {
    let Json(req) = payload?;
    let user_id = req.user_id;
    let package_id = req.package_id;

    match state.billing.create_checkout(req).await {
        Ok(session) => Ok(Json(CheckoutResponse { url: session.url })),
        Err(BillingError::PackageNotFound(_)) => {
            tracing::warn!(user_id = %user_id, package_id = %package_id, "Checkout for unknown package");
            Err(ApiError::BadRequest("Package not found".to_string()))
        }
        Err(e) => {
            tracing::error!(user_id = %user_id, package_id = %package_id, error = %e, "Failed to create checkout session");
            Err(e.into())
        }
    }
}

/// Get a user's credit balance, recent ledger entries and subscriptions
pub async fn get_credits(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<CreditSummary>> {
    let summary = state.billing.credit_summary(UserId(user_id)).await?;
    Ok(Json(summary))
}
