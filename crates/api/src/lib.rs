//! creditsync API Library
//!
//! HTTP surface for the billing service: the Stripe webhook, checkout and
//! cancellation endpoints, credit balance reads and health probes.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::{Config, LogFormat};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
