//! Credit ledger arithmetic
//!
//! Every balance change is an append to `credit_transactions` paired with an
//! update of the `user_credits` row, both computed here from the locked
//! account so the two can never disagree.

use creditsync_shared::{
    CreditAccount, CreditTransaction, CreditTransactionKind, NewCreditTransaction, UserId,
};
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::store::BillingStore;

/// Credits to add to an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub user_id: UserId,
    pub kind: CreditTransactionKind,
    pub credits: i64,
    /// Amount paid for the credits, in minor currency units
    pub amount_paid_cents: i64,
    pub description: String,
}

impl Grant {
    pub fn new(user_id: UserId, kind: CreditTransactionKind, credits: i64, amount_paid_cents: i64) -> Self {
        Self {
            user_id,
            kind,
            credits,
            amount_paid_cents,
            description: kind.default_description().to_string(),
        }
    }
}

/// The ledger entry and updated account produced by a grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantPlan {
    pub entry: NewCreditTransaction,
    pub account: CreditAccount,
}

/// Compute the ledger entry and account state for a grant.
///
/// `account` must be the row-locked current state.
pub fn plan_grant(
    account: &CreditAccount,
    grant: &Grant,
    now: OffsetDateTime,
) -> BillingResult<GrantPlan> {
    if account.user_id != grant.user_id {
        return Err(BillingError::LedgerInvariant(format!(
            "grant for user {} applied to account {}",
            grant.user_id, account.user_id
        )));
    }
    if grant.credits <= 0 {
        return Err(BillingError::LedgerInvariant(format!(
            "grant of {} credits is not positive",
            grant.credits
        )));
    }

    let delta = grant.kind.sign() * grant.credits;
    let balance_after = checked(account.balance.checked_add(delta), "balance")?;
    if balance_after < 0 {
        return Err(BillingError::LedgerInvariant(format!(
            "balance for user {} would become negative",
            account.user_id
        )));
    }

    let mut updated = account.clone();
    updated.balance = balance_after;
    updated.lifetime_purchased =
        checked(account.lifetime_purchased.checked_add(grant.credits), "lifetime_purchased")?;
    updated.lifetime_spent_cents = checked(
        account
            .lifetime_spent_cents
            .checked_add(grant.amount_paid_cents.max(0)),
        "lifetime_spent_cents",
    )?;
    updated.last_purchase_at = Some(now);
    updated.updated_at = now;

    Ok(GrantPlan {
        entry: NewCreditTransaction {
            user_id: grant.user_id,
            kind: grant.kind,
            amount: grant.credits,
            balance_before: account.balance,
            balance_after,
            description: grant.description.clone(),
        },
        account: updated,
    })
}

fn checked(value: Option<i64>, field: &str) -> BillingResult<i64> {
    value.ok_or_else(|| BillingError::LedgerInvariant(format!("{} overflow", field)))
}

/// A mismatch between an account and its transaction log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerDrift {
    pub user_id: UserId,
    pub recorded_balance: i64,
    pub derived_balance: i64,
    /// Entries whose before/after do not match their amount or their predecessor
    pub broken_entries: Vec<i64>,
}

/// Check that an account's balance equals the sum of its transactions and
/// that the transactions form an unbroken chain.
///
/// `entries` must be the user's full log in insertion order.
pub fn verify_account(
    account: &CreditAccount,
    entries: &[CreditTransaction],
) -> Result<(), LedgerDrift> {
    let mut derived = 0i64;
    let mut broken = Vec::new();

    for entry in entries {
        if !entry.is_consistent() || entry.balance_before != derived {
            broken.push(entry.id);
        }
        derived = derived.saturating_add(entry.signed_amount());
    }

    if derived == account.balance && broken.is_empty() {
        Ok(())
    } else {
        Err(LedgerDrift {
            user_id: account.user_id,
            recorded_balance: account.balance,
            derived_balance: derived,
            broken_entries: broken,
        })
    }
}

/// Result of auditing every account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerAuditReport {
    pub accounts_checked: usize,
    pub drifts: Vec<LedgerDrift>,
}

impl LedgerAuditReport {
    pub fn is_clean(&self) -> bool {
        self.drifts.is_empty()
    }
}

/// Recompute every account's balance from its transaction log
pub async fn audit_ledger(store: &dyn BillingStore) -> BillingResult<LedgerAuditReport> {
    let mut report = LedgerAuditReport::default();

    for account in store.accounts().await? {
        let entries = store.ledger_entries(account.user_id).await?;
        report.accounts_checked += 1;
        if let Err(drift) = verify_account(&account, &entries) {
            tracing::error!(
                user_id = %drift.user_id,
                recorded_balance = drift.recorded_balance,
                derived_balance = drift.derived_balance,
                broken_entries = ?drift.broken_entries,
                "Credit balance does not match transaction log"
            );
            report.drifts.push(drift);
        }
    }

    Ok(report)
}
