//! In-memory store for development and tests
//!
//! One async mutex serializes transactions. Each transaction works on a
//! staged copy of the state that replaces the shared state on commit, so an
//! uncommitted transaction leaves no trace.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use creditsync_shared::{
    CreditAccount, CreditPackage, CreditTransaction, NewCreditTransaction, NewPaymentTransaction,
    NewSubscription, PackageId, PaymentMethod, PaymentMethodId, PaymentStatus, PaymentTransaction,
    Subscription, UserId,
};
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{BillingStore, StoreTx};
use crate::error::{BillingError, BillingResult};
use crate::idempotency::EventKey;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    accounts: HashMap<UserId, CreditAccount>,
    transactions: Vec<CreditTransaction>,
    subscriptions: Vec<Subscription>,
    payments: Vec<PaymentTransaction>,
    packages: HashMap<PackageId, CreditPackage>,
    payment_methods: Vec<PaymentMethod>,
    claims: HashMap<EventKey, (String, OffsetDateTime)>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`BillingStore`]
#[derive(Clone)]
pub struct MemoryBillingStore {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryBillingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBillingStore {
    /// Empty store seeded with the `stripe` and `stripe_subscription` payment methods
    pub fn new() -> Self {
        let mut state = MemoryState::default();
        for (code, name) in [("stripe", "Stripe"), ("stripe_subscription", "Stripe subscription")] {
            let id = state.next_id();
            state.payment_methods.push(PaymentMethod {
                id: PaymentMethodId(id),
                code: code.to_string(),
                name: name.to_string(),
                is_active: true,
            });
        }
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub async fn add_package(&self, package: CreditPackage) {
        self.state.lock().await.packages.insert(package.id, package);
    }

    pub async fn remove_payment_method(&self, code: &str) {
        self.state
            .lock()
            .await
            .payment_methods
            .retain(|m| m.code != code);
    }

    pub async fn subscription(&self, external_subscription_id: &str) -> Option<Subscription> {
        self.state
            .lock()
            .await
            .subscriptions
            .iter()
            .find(|s| s.external_subscription_id == external_subscription_id)
            .cloned()
    }

    pub async fn payment(&self, external_transaction_id: &str) -> Option<PaymentTransaction> {
        self.state
            .lock()
            .await
            .payments
            .iter()
            .find(|p| p.external_transaction_id == external_transaction_id)
            .cloned()
    }

    /// Every ledger entry across all users
    pub async fn all_transactions(&self) -> Vec<CreditTransaction> {
        self.state.lock().await.transactions.clone()
    }

    pub async fn claim_count(&self) -> usize {
        self.state.lock().await.claims.len()
    }

    /// Overwrite a balance without a ledger entry (simulates drift)
    pub async fn force_balance(&self, user_id: UserId, balance: i64) {
        if let Some(account) = self.state.lock().await.accounts.get_mut(&user_id) {
            account.balance = balance;
        }
    }
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn begin(&self) -> BillingResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = (*guard).clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn account(&self, user_id: UserId) -> BillingResult<Option<CreditAccount>> {
        Ok(self.state.lock().await.accounts.get(&user_id).cloned())
    }

    async fn recent_transactions(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> BillingResult<Vec<CreditTransaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn subscriptions_for_user(&self, user_id: UserId) -> BillingResult<Vec<Subscription>> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn package(&self, package_id: PackageId) -> BillingResult<Option<CreditPackage>> {
        Ok(self.state.lock().await.packages.get(&package_id).cloned())
    }

    async fn payment_method(&self, code: &str) -> BillingResult<Option<PaymentMethod>> {
        let state = self.state.lock().await;
        Ok(state.payment_methods.iter().find(|m| m.code == code).cloned())
    }

    async fn insert_payment_transaction(
        &self,
        payment: NewPaymentTransaction,
    ) -> BillingResult<PaymentTransaction> {
        let mut state = self.state.lock().await;
        if state
            .payments
            .iter()
            .any(|p| p.external_transaction_id == payment.external_transaction_id)
        {
            return Err(BillingError::Database(format!(
                "duplicate payment transaction {}",
                payment.external_transaction_id
            )));
        }
        let now = OffsetDateTime::now_utc();
        let row = PaymentTransaction {
            id: state.next_id(),
            user_id: payment.user_id,
            package_id: payment.package_id,
            payment_method_id: payment.payment_method_id,
            amount_cents: payment.amount_cents,
            currency: payment.currency,
            status: PaymentStatus::Pending,
            external_transaction_id: payment.external_transaction_id,
            created_at: now,
            updated_at: now,
        };
        state.payments.push(row.clone());
        Ok(row)
    }

    async fn accounts(&self) -> BillingResult<Vec<CreditAccount>> {
        let state = self.state.lock().await;
        let mut accounts: Vec<_> = state.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.user_id);
        Ok(accounts)
    }

    async fn ledger_entries(&self, user_id: UserId) -> BillingResult<Vec<CreditTransaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn is_claimed(&self, key: &EventKey) -> BillingResult<bool> {
        Ok(self.state.lock().await.claims.contains_key(key))
    }

    async fn purge_claims(&self, older_than: OffsetDateTime) -> BillingResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.claims.len();
        state.claims.retain(|_, (_, claimed_at)| *claimed_at >= older_than);
        Ok((before - state.claims.len()) as u64)
    }

    async fn ping(&self) -> BillingResult<()> {
        Ok(())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn try_claim(&mut self, key: &EventKey, event_id: &str) -> BillingResult<bool> {
        if self.staged.claims.contains_key(key) {
            return Ok(false);
        }
        self.staged.claims.insert(
            key.clone(),
            (event_id.to_string(), OffsetDateTime::now_utc()),
        );
        Ok(true)
    }

    async fn complete_payment(
        &mut self,
        external_transaction_id: &str,
    ) -> BillingResult<Option<PaymentTransaction>> {
        let payment = self
            .staged
            .payments
            .iter_mut()
            .find(|p| p.external_transaction_id == external_transaction_id);
        Ok(payment.map(|p| {
            p.status = PaymentStatus::Completed;
            p.updated_at = OffsetDateTime::now_utc();
            p.clone()
        }))
    }

    async fn lock_account(&mut self, user_id: UserId) -> BillingResult<CreditAccount> {
        let account = self
            .staged
            .accounts
            .entry(user_id)
            .or_insert_with(|| CreditAccount::empty(user_id, OffsetDateTime::now_utc()));
        Ok(account.clone())
    }

    async fn save_account(&mut self, account: &CreditAccount) -> BillingResult<()> {
        if account.balance < 0 {
            return Err(BillingError::Database(
                "user_credits balance check violated".to_string(),
            ));
        }
        self.staged.accounts.insert(account.user_id, account.clone());
        Ok(())
    }

    async fn append_transaction(
        &mut self,
        entry: NewCreditTransaction,
    ) -> BillingResult<CreditTransaction> {
        if entry.amount <= 0 || entry.balance_after - entry.balance_before != entry.amount {
            return Err(BillingError::Database(
                "credit_transactions check violated".to_string(),
            ));
        }
        let row = CreditTransaction {
            id: self.staged.next_id(),
            user_id: entry.user_id,
            kind: entry.kind,
            amount: entry.amount,
            balance_before: entry.balance_before,
            balance_after: entry.balance_after,
            description: entry.description,
            created_at: OffsetDateTime::now_utc(),
        };
        self.staged.transactions.push(row.clone());
        Ok(row)
    }

    async fn find_subscription(
        &mut self,
        external_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        Ok(self
            .staged
            .subscriptions
            .iter()
            .find(|s| s.external_subscription_id == external_subscription_id)
            .cloned())
    }

    async fn insert_subscription(
        &mut self,
        subscription: NewSubscription,
    ) -> BillingResult<Subscription> {
        if self
            .staged
            .subscriptions
            .iter()
            .any(|s| s.external_subscription_id == subscription.external_subscription_id)
        {
            return Err(BillingError::Database(format!(
                "duplicate subscription {}",
                subscription.external_subscription_id
            )));
        }
        let now = OffsetDateTime::now_utc();
        let row = Subscription {
            id: self.staged.next_id(),
            user_id: subscription.user_id,
            package_id: subscription.package_id,
            payment_method_id: subscription.payment_method_id,
            external_subscription_id: subscription.external_subscription_id,
            status: subscription.status,
            next_billing_at: subscription.next_billing_at,
            end_at: None,
            snapshot: subscription.snapshot,
            created_at: now,
            updated_at: now,
        };
        self.staged.subscriptions.push(row.clone());
        Ok(row)
    }

    async fn update_subscription(&mut self, subscription: &Subscription) -> BillingResult<()> {
        let existing = self
            .staged
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription.id)
            .ok_or_else(|| {
                BillingError::SubscriptionNotFound(subscription.external_subscription_id.clone())
            })?;
        *existing = Subscription {
            updated_at: OffsetDateTime::now_utc(),
            ..subscription.clone()
        };
        Ok(())
    }

    async fn find_package(&mut self, package_id: PackageId) -> BillingResult<Option<CreditPackage>> {
        Ok(self.staged.packages.get(&package_id).cloned())
    }

    async fn find_payment_method(&mut self, code: &str) -> BillingResult<Option<PaymentMethod>> {
        Ok(self
            .staged
            .payment_methods
            .iter()
            .find(|m| m.code == code)
            .cloned())
    }

    async fn commit(self: Box<Self>) -> BillingResult<()> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::idempotency::IntentKind;
    use creditsync_shared::CreditTransactionKind;

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryBillingStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            let key = EventKey::new(IntentKind::RenewalGrant, "in_1");
            assert!(tx.try_claim(&key, "evt_1").await.unwrap());
            tx.lock_account(UserId(1)).await.unwrap();
        }
        assert_eq!(store.claim_count().await, 0);
        assert_eq!(store.account(UserId(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_committed_claim_is_seen_by_next_transaction() {
        let store = MemoryBillingStore::new();
        let key = EventKey::new(IntentKind::InitialGrant, "cs_1");

        let mut tx = store.begin().await.unwrap();
        assert!(tx.try_claim(&key, "evt_1").await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(!tx.try_claim(&key, "evt_2").await.unwrap());
    }

    #[tokio::test]
    async fn test_append_enforces_ledger_check() {
        let store = MemoryBillingStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .append_transaction(NewCreditTransaction {
                user_id: UserId(1),
                kind: CreditTransactionKind::Purchase,
                amount: 10,
                balance_before: 0,
                balance_after: 5,
                description: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Database(_)));
    }

    #[tokio::test]
    async fn test_is_claimed_ignores_uncommitted_claims() {
        let store = MemoryBillingStore::new();
        let key = EventKey::new(IntentKind::RenewalGrant, "in_1");

        let mut tx = store.begin().await.unwrap();
        tx.try_claim(&key, "evt_1").await.unwrap();
        drop(tx);
        assert!(!store.is_claimed(&key).await.unwrap());

        let mut tx = store.begin().await.unwrap();
        tx.try_claim(&key, "evt_1").await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.is_claimed(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_claims_by_age() {
        let store = MemoryBillingStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.try_claim(&EventKey::new(IntentKind::Cancelled, "sub_1"), "evt_1")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let purged = store
            .purge_claims(OffsetDateTime::now_utc() - time::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(purged, 0);

        let purged = store
            .purge_claims(OffsetDateTime::now_utc() + time::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
    }
}
