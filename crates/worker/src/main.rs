//! creditsync maintenance worker

mod config;
mod maintenance;

use std::sync::Arc;

use anyhow::Context;
use creditsync_api::telemetry;
use creditsync_billing::{BillingStore, PgBillingStore};
use tokio_cron_scheduler::JobScheduler;

use crate::config::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env().context("Failed to load configuration")?;
    telemetry::init_tracing(config.log_format);

    tracing::info!("Starting creditsync worker");

    let pool = creditsync_shared::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    let store: Arc<dyn BillingStore> = Arc::new(PgBillingStore::new(pool));

    // Audit once at startup so drift shows up without waiting for the first tick
    if let Err(e) = maintenance::run_ledger_audit(store.as_ref()).await {
        tracing::error!(error = %e, "Startup ledger audit failed");
    }

    let mut scheduler = JobScheduler::new().await?;
    maintenance::register_jobs(&scheduler, store, &config).await?;
    scheduler.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    scheduler.shutdown().await?;
    Ok(())
}
