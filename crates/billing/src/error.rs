//! Billing error types

use creditsync_shared::{PackageId, SharedError};
use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Webhook signature verification failed: {0}")]
    WebhookSignatureInvalid(String),

    /// A recognized event type whose payload could not be interpreted
    #[error("Malformed billing event: {0}")]
    MalformedEvent(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Package not found: {0}")]
    PackageNotFound(PackageId),

    #[error("Payment method not found: {0}")]
    PaymentMethodNotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Ledger invariant violated: {0}")]
    LedgerInvariant(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Errors caused by the caller rather than by processing
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::WebhookSignatureInvalid(_) | BillingError::InvalidInput(_)
        )
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<SharedError> for BillingError {
    fn from(err: SharedError) -> Self {
        BillingError::MalformedEvent(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
