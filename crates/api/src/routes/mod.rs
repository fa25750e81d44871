//! API routes

pub mod billing;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (no auth)
    let health_routes = Router::new()
        .route("/health", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Billing routes - under /api/v1
    let billing_routes = Router::new()
        // Stripe webhook (authenticated by signature verification)
        .route("/billing/webhook", post(billing::webhook))
        .route("/billing/checkout", post(billing::create_checkout))
        .route(
            "/billing/subscriptions/cancel",
            post(billing::cancel_subscription),
        )
        .route("/billing/credits/:user_id", get(billing::get_credits));

    // Browser clients call checkout and cancellation directly
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", billing_routes)
        // Provider payloads are small; 1MB is generous
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
