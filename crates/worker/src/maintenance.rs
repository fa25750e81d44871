//! Scheduled maintenance jobs
//!
//! - Ledger audit: recompute every balance from its transaction log
//! - Claim cleanup: drop idempotency claims past the retention window

use std::sync::Arc;

use creditsync_billing::{audit_ledger, BillingResult, BillingStore, LedgerAuditReport};
use time::{Duration, OffsetDateTime};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{error, info, warn};

use crate::config::WorkerConfig;

/// Audit the ledger once and log a summary
pub async fn run_ledger_audit(store: &dyn BillingStore) -> BillingResult<LedgerAuditReport> {
    let report = audit_ledger(store).await?;

    if report.is_clean() {
        info!(accounts = report.accounts_checked, "Ledger audit passed");
    } else {
        warn!(
            accounts = report.accounts_checked,
            drifted = report.drifts.len(),
            "Ledger audit found drifted accounts"
        );
    }

    Ok(report)
}

/// Delete claims recorded before `now - retention`
pub async fn purge_expired_claims(
    store: &dyn BillingStore,
    retention: Duration,
    now: OffsetDateTime,
) -> BillingResult<u64> {
    let cutoff = now - retention;
    let purged = store.purge_claims(cutoff).await?;

    if purged > 0 {
        info!(purged, cutoff = %cutoff, "Purged expired idempotency claims");
    }

    Ok(purged)
}

/// Register both jobs on the scheduler
pub async fn register_jobs(
    scheduler: &JobScheduler,
    store: Arc<dyn BillingStore>,
    config: &WorkerConfig,
) -> Result<(), JobSchedulerError> {
    let audit_store = store.clone();
    let audit = Job::new_async(config.ledger_audit_cron.as_str(), move |_id, _scheduler| {
        let store = audit_store.clone();
        Box::pin(async move {
            if let Err(e) = run_ledger_audit(store.as_ref()).await {
                error!(error = %e, "Ledger audit failed");
            }
        })
    })?;
    scheduler.add(audit).await?;

    let retention = Duration::days(config.claim_retention_days);
    let cleanup = Job::new_async(config.claim_cleanup_cron.as_str(), move |_id, _scheduler| {
        let store = store.clone();
        Box::pin(async move {
            if let Err(e) =
                purge_expired_claims(store.as_ref(), retention, OffsetDateTime::now_utc()).await
            {
                error!(error = %e, "Claim cleanup failed");
            }
        })
    })?;
    scheduler.add(cleanup).await?;

    info!(
        ledger_audit_cron = %config.ledger_audit_cron,
        claim_cleanup_cron = %config.claim_cleanup_cron,
        claim_retention_days = config.claim_retention_days,
        "Maintenance jobs scheduled"
    );

    Ok(())
}
