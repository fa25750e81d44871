//! Application configuration

use std::env;

use creditsync_billing::client::{StripeConfig, DEFAULT_WEBHOOK_TOLERANCE_SECS};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env_value(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,

    // Stripe
    pub stripe: StripeConfig,

    // Logging
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            run_migrations: env::var("RUN_MIGRATIONS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),

            // Stripe
            stripe: stripe_from_env()?,

            // Logging
            log_format: env::var("LOG_FORMAT")
                .map(|v| LogFormat::from_env_value(&v))
                .unwrap_or_default(),
        })
    }
}

fn stripe_from_env() -> Result<StripeConfig, ConfigError> {
    let currency = env::var("BILLING_CURRENCY").unwrap_or_else(|_| "pln".to_string());
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ConfigError::Invalid(
            "BILLING_CURRENCY must be a three-letter ISO currency code",
        ));
    }

    Ok(StripeConfig {
        secret_key: env::var("STRIPE_SECRET_KEY")
            .map_err(|_| ConfigError::Missing("STRIPE_SECRET_KEY"))?,
        webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| ConfigError::Missing("STRIPE_WEBHOOK_SECRET"))?,
        webhook_tolerance_secs: env::var("STRIPE_WEBHOOK_TOLERANCE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_WEBHOOK_TOLERANCE_SECS),
        currency: currency.to_lowercase(),
        subscription_payment_method_code: env::var("SUBSCRIPTION_PAYMENT_METHOD_CODE")
            .unwrap_or_else(|_| "stripe_subscription".to_string()),
        one_time_payment_method_code: env::var("ONE_TIME_PAYMENT_METHOD_CODE")
            .unwrap_or_else(|_| "stripe".to_string()),
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
