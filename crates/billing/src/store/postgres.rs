//! Postgres-backed store

use async_trait::async_trait;
use creditsync_shared::{
    CreditAccount, CreditPackage, CreditTransaction, NewCreditTransaction, NewPaymentTransaction,
    NewSubscription, PackageId, PaymentMethod, PaymentStatus, PaymentTransaction, Subscription,
    UserId,
};
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;

use super::{BillingStore, StoreTx};
use crate::error::BillingResult;
use crate::idempotency::EventKey;

const ACCOUNT_COLUMNS: &str = "user_id, balance, lifetime_purchased, lifetime_spent_cents, \
     last_purchase_at, created_at, updated_at";

const TRANSACTION_COLUMNS: &str =
    "id, user_id, kind, amount, balance_before, balance_after, description, created_at";

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, package_id, payment_method_id, \
     external_subscription_id, status, next_billing_at, end_at, snapshot, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, user_id, package_id, payment_method_id, amount_cents, currency, \
     status, external_transaction_id, created_at, updated_at";

/// [`BillingStore`] over a Postgres pool
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn begin(&self) -> BillingResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn account(&self, user_id: UserId) -> BillingResult<Option<CreditAccount>> {
        let account = sqlx::query_as::<_, CreditAccount>(&format!(
            "SELECT {} FROM user_credits WHERE user_id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn recent_transactions(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> BillingResult<Vec<CreditTransaction>> {
        let rows = sqlx::query_as::<_, CreditTransaction>(&format!(
            "SELECT {} FROM credit_transactions WHERE user_id = $1 ORDER BY id DESC LIMIT $2",
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn subscriptions_for_user(&self, user_id: UserId) -> BillingResult<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn package(&self, package_id: PackageId) -> BillingResult<Option<CreditPackage>> {
        let package = sqlx::query_as::<_, CreditPackage>(
            "SELECT id, name, credits, price_cents, is_active FROM credit_packages WHERE id = $1",
        )
        .bind(package_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(package)
    }

    async fn payment_method(&self, code: &str) -> BillingResult<Option<PaymentMethod>> {
        let method = sqlx::query_as::<_, PaymentMethod>(
            "SELECT id, code, name, is_active FROM payment_methods WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(method)
    }

    async fn insert_payment_transaction(
        &self,
        payment: NewPaymentTransaction,
    ) -> BillingResult<PaymentTransaction> {
        let row = sqlx::query_as::<_, PaymentTransaction>(&format!(
            r#"
            INSERT INTO payment_transactions
                (user_id, package_id, payment_method_id, amount_cents, currency, status, external_transaction_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(payment.user_id)
        .bind(payment.package_id)
        .bind(payment.payment_method_id)
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(PaymentStatus::Pending)
        .bind(&payment.external_transaction_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn accounts(&self) -> BillingResult<Vec<CreditAccount>> {
        let rows = sqlx::query_as::<_, CreditAccount>(&format!(
            "SELECT {} FROM user_credits ORDER BY user_id",
            ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn ledger_entries(&self, user_id: UserId) -> BillingResult<Vec<CreditTransaction>> {
        let rows = sqlx::query_as::<_, CreditTransaction>(&format!(
            "SELECT {} FROM credit_transactions WHERE user_id = $1 ORDER BY id",
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn is_claimed(&self, key: &EventKey) -> BillingResult<bool> {
        let claimed: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM webhook_event_claims
                WHERE intent_kind = $1 AND external_id = $2
            )
            "#,
        )
        .bind(key.kind.as_str())
        .bind(&key.external_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(claimed)
    }

    async fn purge_claims(&self, older_than: OffsetDateTime) -> BillingResult<u64> {
        let result = sqlx::query("DELETE FROM webhook_event_claims WHERE claimed_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> BillingResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn try_claim(&mut self, key: &EventKey, event_id: &str) -> BillingResult<bool> {
        // A concurrent claimant blocks on the primary key until we commit or roll back
        let claimed: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO webhook_event_claims (intent_kind, external_id, event_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (intent_kind, external_id) DO NOTHING
            RETURNING event_id
            "#,
        )
        .bind(key.kind.as_str())
        .bind(&key.external_id)
        .bind(event_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(claimed.is_some())
    }

    async fn complete_payment(
        &mut self,
        external_transaction_id: &str,
    ) -> BillingResult<Option<PaymentTransaction>> {
        let row = sqlx::query_as::<_, PaymentTransaction>(&format!(
            r#"
            UPDATE payment_transactions
            SET status = $2, updated_at = NOW()
            WHERE external_transaction_id = $1
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(external_transaction_id)
        .bind(PaymentStatus::Completed)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn lock_account(&mut self, user_id: UserId) -> BillingResult<CreditAccount> {
        sqlx::query("INSERT INTO user_credits (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;

        let account = sqlx::query_as::<_, CreditAccount>(&format!(
            "SELECT {} FROM user_credits WHERE user_id = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(account)
    }

    async fn save_account(&mut self, account: &CreditAccount) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE user_credits
            SET balance = $2,
                lifetime_purchased = $3,
                lifetime_spent_cents = $4,
                last_purchase_at = $5,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(account.user_id)
        .bind(account.balance)
        .bind(account.lifetime_purchased)
        .bind(account.lifetime_spent_cents)
        .bind(account.last_purchase_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_transaction(
        &mut self,
        entry: NewCreditTransaction,
    ) -> BillingResult<CreditTransaction> {
        let row = sqlx::query_as::<_, CreditTransaction>(&format!(
            r#"
            INSERT INTO credit_transactions
                (user_id, kind, amount, balance_before, balance_after, description)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(entry.user_id)
        .bind(entry.kind)
        .bind(entry.amount)
        .bind(entry.balance_before)
        .bind(entry.balance_after)
        .bind(&entry.description)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn find_subscription(
        &mut self,
        external_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        let row = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {} FROM subscriptions WHERE external_subscription_id = $1 FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(external_subscription_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_subscription(
        &mut self,
        subscription: NewSubscription,
    ) -> BillingResult<Subscription> {
        let row = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions
                (user_id, package_id, payment_method_id, external_subscription_id, status, next_billing_at, snapshot)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(subscription.user_id)
        .bind(subscription.package_id)
        .bind(subscription.payment_method_id)
        .bind(&subscription.external_subscription_id)
        .bind(subscription.status.as_str())
        .bind(subscription.next_billing_at)
        .bind(&subscription.snapshot)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_subscription(&mut self, subscription: &Subscription) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $2,
                next_billing_at = $3,
                end_at = $4,
                snapshot = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.status.as_str())
        .bind(subscription.next_billing_at)
        .bind(subscription.end_at)
        .bind(&subscription.snapshot)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_package(&mut self, package_id: PackageId) -> BillingResult<Option<CreditPackage>> {
        let package = sqlx::query_as::<_, CreditPackage>(
            "SELECT id, name, credits, price_cents, is_active FROM credit_packages WHERE id = $1",
        )
        .bind(package_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(package)
    }

    async fn find_payment_method(&mut self, code: &str) -> BillingResult<Option<PaymentMethod>> {
        let method = sqlx::query_as::<_, PaymentMethod>(
            "SELECT id, code, name, is_active FROM payment_methods WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(method)
    }

    async fn commit(self: Box<Self>) -> BillingResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
