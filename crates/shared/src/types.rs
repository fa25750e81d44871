//! Common types used across creditsync

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

use crate::error::SharedError;

// =============================================================================
// ID Wrappers
// =============================================================================

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = SharedError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<i64>()
                    .map(Self)
                    .map_err(|_| SharedError::InvalidId(s.to_string()))
            }
        }
    };
}

numeric_id!(
    /// User ID wrapper (users are identified by the numeric id issued at signup)
    UserId
);
numeric_id!(
    /// Credit package ID wrapper
    PackageId
);
numeric_id!(
    /// Payment method ID wrapper
    PaymentMethodId
);

// =============================================================================
// Enums
// =============================================================================

/// Checkout session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutMode {
    /// One-time credit package purchase
    Payment,
    /// Recurring monthly credit subscription
    #[default]
    Subscription,
}

impl CheckoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Subscription => "subscription",
        }
    }
}

impl FromStr for CheckoutMode {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment" => Ok(Self::Payment),
            "subscription" => Ok(Self::Subscription),
            other => Err(SharedError::UnknownVariant {
                kind: "checkout mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Kind of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditTransactionKind {
    Purchase,
    SubscriptionInitial,
    SubscriptionRenewal,
}

impl CreditTransactionKind {
    /// Ledger sign of this kind. Every kind currently adds credits.
    pub fn sign(&self) -> i64 {
        match self {
            Self::Purchase | Self::SubscriptionInitial | Self::SubscriptionRenewal => 1,
        }
    }

    /// Default human-readable description for ledger entries of this kind
    pub fn default_description(&self) -> &'static str {
        match self {
            Self::Purchase => "Credit package purchase via Stripe",
            Self::SubscriptionInitial => "Monthly credit subscription via Stripe",
            Self::SubscriptionRenewal => "Monthly credit subscription renewal",
        }
    }
}

/// Payment transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

/// Subscription lifecycle status
///
/// The provider is the only source of truth. Values outside the known set are
/// kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionStatus {
    Pending,
    #[default]
    Active,
    Paused,
    Cancelled,
    Other(String),
}

impl SubscriptionStatus {
    /// Map a provider subscription status onto the internal enum.
    ///
    /// `active → active`, `paused → paused`, `canceled → cancelled`,
    /// anything else is passed through verbatim.
    pub fn from_provider(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "paused" => Self::Paused,
            "canceled" => Self::Cancelled,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Other(s) => s.as_str(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<String> for SubscriptionStatus {
    /// Parse a stored status column
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => Self::Pending,
            "active" => Self::Active,
            "paused" => Self::Paused,
            "cancelled" => Self::Cancelled,
            _ => Self::Other(s),
        }
    }
}

impl From<SubscriptionStatus> for String {
    fn from(status: SubscriptionStatus) -> Self {
        match status {
            SubscriptionStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Per-user credit balance (`user_credits`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CreditAccount {
    pub user_id: UserId,
    pub balance: i64,
    pub lifetime_purchased: i64,
    /// Total paid, in minor currency units
    pub lifetime_spent_cents: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_purchase_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl CreditAccount {
    /// A zero-balance account, as seen before the first grant
    pub fn empty(user_id: UserId, now: OffsetDateTime) -> Self {
        Self {
            user_id,
            balance: 0,
            lifetime_purchased: 0,
            lifetime_spent_cents: 0,
            last_purchase_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable ledger entry (`credit_transactions`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CreditTransaction {
    pub id: i64,
    pub user_id: UserId,
    pub kind: CreditTransactionKind,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl CreditTransaction {
    /// Amount with the ledger sign of its kind applied
    pub fn signed_amount(&self) -> i64 {
        self.kind.sign() * self.amount
    }

    /// `balance_after - balance_before` must equal the signed amount
    pub fn is_consistent(&self) -> bool {
        self.balance_after - self.balance_before == self.signed_amount()
    }
}

/// Ledger entry to be appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCreditTransaction {
    pub user_id: UserId,
    pub kind: CreditTransactionKind,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: String,
}

// =============================================================================
// Subscriptions
// =============================================================================

/// One row per provider-issued recurring agreement (`subscriptions`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: UserId,
    pub package_id: PackageId,
    pub payment_method_id: PaymentMethodId,
    pub external_subscription_id: String,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub next_billing_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_at: Option<OffsetDateTime>,
    /// Opaque provider object, kept for audit and debugging
    pub snapshot: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

// Implement FromRow for Subscription (status is a free-form column)
impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for Subscription {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            package_id: row.try_get("package_id")?,
            payment_method_id: row.try_get("payment_method_id")?,
            external_subscription_id: row.try_get("external_subscription_id")?,
            status: SubscriptionStatus::from(status),
            next_billing_at: row.try_get("next_billing_at")?,
            end_at: row.try_get("end_at")?,
            snapshot: row.try_get("snapshot")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Subscription row to be inserted on first checkout completion
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscription {
    pub user_id: UserId,
    pub package_id: PackageId,
    pub payment_method_id: PaymentMethodId,
    pub external_subscription_id: String,
    pub status: SubscriptionStatus,
    pub next_billing_at: OffsetDateTime,
    pub snapshot: serde_json::Value,
}

// =============================================================================
// Payments and reference data
// =============================================================================

/// One row per checkout attempt (`payment_transactions`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PaymentTransaction {
    pub id: i64,
    pub user_id: UserId,
    pub package_id: PackageId,
    pub payment_method_id: PaymentMethodId,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    /// Checkout session id
    pub external_transaction_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Pending payment recorded when a checkout session is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaymentTransaction {
    pub user_id: UserId,
    pub package_id: PackageId,
    pub payment_method_id: PaymentMethodId,
    pub amount_cents: i64,
    pub currency: String,
    pub external_transaction_id: String,
}

/// Purchasable credit package (`credit_packages`, read-only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CreditPackage {
    pub id: PackageId,
    pub name: String,
    pub credits: i64,
    pub price_cents: i64,
    pub is_active: bool,
}

/// Payment method reference (`payment_methods`, read-only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub code: String,
    pub name: String,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(SubscriptionStatus::from_provider("active"), SubscriptionStatus::Active);
        assert_eq!(SubscriptionStatus::from_provider("paused"), SubscriptionStatus::Paused);
        assert_eq!(
            SubscriptionStatus::from_provider("canceled"),
            SubscriptionStatus::Cancelled
        );
        assert_eq!(
            SubscriptionStatus::from_provider("past_due"),
            SubscriptionStatus::Other("past_due".to_string())
        );
        assert_eq!(SubscriptionStatus::from_provider("past_due").as_str(), "past_due");
    }

    #[test]
    fn test_stored_status_round_trips_unknown_values() {
        let status = SubscriptionStatus::from("incomplete_expired".to_string());
        assert_eq!(String::from(status), "incomplete_expired");
        assert_eq!(
            SubscriptionStatus::from("cancelled".to_string()),
            SubscriptionStatus::Cancelled
        );
    }

    #[test]
    fn test_user_id_parse() {
        assert_eq!("42".parse::<UserId>(), Ok(UserId(42)));
        assert!("abc".parse::<UserId>().is_err());
    }

    #[test]
    fn test_transaction_consistency() {
        let tx = CreditTransaction {
            id: 1,
            user_id: UserId(7),
            kind: CreditTransactionKind::SubscriptionRenewal,
            amount: 100,
            balance_before: 100,
            balance_after: 200,
            description: String::new(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        assert!(tx.is_consistent());

        let broken = CreditTransaction {
            balance_after: 150,
            ..tx
        };
        assert!(!broken.is_consistent());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_status_serializes_as_plain_string() {
        let json = serde_json::to_value(SubscriptionStatus::Paused).unwrap();
        assert_eq!(json, serde_json::json!("paused"));
    }
}
