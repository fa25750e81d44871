//! Persistent store seam
//!
//! Reconciliation runs entirely inside one [`StoreTx`]: the idempotency claim,
//! ledger append, balance update and subscription write either all commit or
//! none do. Dropping a transaction without calling [`StoreTx::commit`] rolls
//! it back.

mod memory;
mod postgres;

pub use memory::MemoryBillingStore;
pub use postgres::PgBillingStore;

use async_trait::async_trait;
use creditsync_shared::{
    CreditAccount, CreditPackage, CreditTransaction, NewCreditTransaction, NewPaymentTransaction,
    NewSubscription, PackageId, PaymentMethod, PaymentTransaction, Subscription, UserId,
};
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::idempotency::EventKey;

/// Store operations available outside a reconciliation transaction
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Open a transaction for one reconciliation
    async fn begin(&self) -> BillingResult<Box<dyn StoreTx>>;

    async fn account(&self, user_id: UserId) -> BillingResult<Option<CreditAccount>>;

    /// Newest first
    async fn recent_transactions(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> BillingResult<Vec<CreditTransaction>>;

    async fn subscriptions_for_user(&self, user_id: UserId) -> BillingResult<Vec<Subscription>>;

    async fn package(&self, package_id: PackageId) -> BillingResult<Option<CreditPackage>>;

    async fn payment_method(&self, code: &str) -> BillingResult<Option<PaymentMethod>>;

    /// Record a pending checkout attempt
    async fn insert_payment_transaction(
        &self,
        payment: NewPaymentTransaction,
    ) -> BillingResult<PaymentTransaction>;

    /// Every account, for auditing
    async fn accounts(&self) -> BillingResult<Vec<CreditAccount>>;

    /// A user's full transaction log in insertion order
    async fn ledger_entries(&self, user_id: UserId) -> BillingResult<Vec<CreditTransaction>>;

    /// Whether `key` has a committed claim. Advisory only: the claim taken
    /// inside the transaction decides.
    async fn is_claimed(&self, key: &EventKey) -> BillingResult<bool>;

    /// Delete idempotency claims taken before `older_than`
    async fn purge_claims(&self, older_than: OffsetDateTime) -> BillingResult<u64>;

    /// Readiness check
    async fn ping(&self) -> BillingResult<()>;
}

/// A single all-or-nothing unit of reconciliation work
#[async_trait]
pub trait StoreTx: Send {
    /// Insert the claim for `key`. Returns false if it was already claimed.
    async fn try_claim(&mut self, key: &EventKey, event_id: &str) -> BillingResult<bool>;

    /// Mark the payment for a checkout session completed
    async fn complete_payment(
        &mut self,
        external_transaction_id: &str,
    ) -> BillingResult<Option<PaymentTransaction>>;

    /// Load the account under a row lock, creating it at zero if absent
    async fn lock_account(&mut self, user_id: UserId) -> BillingResult<CreditAccount>;

    async fn save_account(&mut self, account: &CreditAccount) -> BillingResult<()>;

    async fn append_transaction(
        &mut self,
        entry: NewCreditTransaction,
    ) -> BillingResult<CreditTransaction>;

    /// Load a subscription by provider id under a row lock
    async fn find_subscription(
        &mut self,
        external_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>>;

    async fn insert_subscription(&mut self, subscription: NewSubscription)
        -> BillingResult<Subscription>;

    /// Persist status, billing cursor, end date and snapshot
    async fn update_subscription(&mut self, subscription: &Subscription) -> BillingResult<()>;

    async fn find_package(&mut self, package_id: PackageId) -> BillingResult<Option<CreditPackage>>;

    async fn find_payment_method(&mut self, code: &str) -> BillingResult<Option<PaymentMethod>>;

    async fn commit(self: Box<Self>) -> BillingResult<()>;
}
