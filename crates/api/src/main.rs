//! creditsync API server

use std::sync::Arc;

use anyhow::Context;
use creditsync_api::{create_router, telemetry, AppState, Config};
use creditsync_billing::{BillingService, PgBillingStore, StripeClient};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    telemetry::init_tracing(config.log_format);

    tracing::info!(bind_address = %config.bind_address, "Starting creditsync API");

    let pool = creditsync_shared::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;

    if config.run_migrations {
        creditsync_shared::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;
        tracing::info!("Database migrations applied");
    }

    let store = Arc::new(PgBillingStore::new(pool));
    let provider = Arc::new(StripeClient::new(config.stripe.clone()));
    let billing = BillingService::new(store, provider, &config.stripe);

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    let app = create_router(AppState::new(billing));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("creditsync API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
