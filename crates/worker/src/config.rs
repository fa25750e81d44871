//! Worker configuration

use std::env;

use creditsync_api::{config::ConfigError, LogFormat};

/// Hourly, on the hour
pub const DEFAULT_LEDGER_AUDIT_CRON: &str = "0 0 * * * *";
/// Daily at 03:30 UTC
pub const DEFAULT_CLAIM_CLEANUP_CRON: &str = "0 30 3 * * *";
pub const DEFAULT_CLAIM_RETENTION_DAYS: i64 = 90;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    /// Idempotency claims older than this are purged
    pub claim_retention_days: i64,
    pub ledger_audit_cron: String,
    pub claim_cleanup_cron: String,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let claim_retention_days = env::var("CLAIM_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CLAIM_RETENTION_DAYS);
        if claim_retention_days < 1 {
            return Err(ConfigError::Invalid("CLAIM_RETENTION_DAYS must be at least 1"));
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            claim_retention_days,
            ledger_audit_cron: env::var("LEDGER_AUDIT_CRON")
                .unwrap_or_else(|_| DEFAULT_LEDGER_AUDIT_CRON.to_string()),
            claim_cleanup_cron: env::var("CLAIM_CLEANUP_CRON")
                .unwrap_or_else(|_| DEFAULT_CLAIM_CLEANUP_CRON.to_string()),
            log_format: env::var("LOG_FORMAT")
                .map(|v| LogFormat::from_env_value(&v))
                .unwrap_or_default(),
        })
    }
}
