//! Idempotency keys for reconciled events
//!
//! The provider delivers events at least once and may send several distinct
//! events for the same fact (`invoice.paid` and `invoice.payment_succeeded`).
//! Claims are therefore keyed by the fact being applied, not by event id,
//! except for status changes where every event is its own fact.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classifier::Intent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    InitialGrant,
    RenewalGrant,
    Cancelled,
    StatusChanged,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::InitialGrant => "initial_grant",
            IntentKind::RenewalGrant => "renewal_grant",
            IntentKind::Cancelled => "cancelled",
            IntentKind::StatusChanged => "status_changed",
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary key of a `webhook_event_claims` row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub kind: IntentKind,
    pub external_id: String,
}

impl EventKey {
    pub fn new(kind: IntentKind, external_id: impl Into<String>) -> Self {
        Self {
            kind,
            external_id: external_id.into(),
        }
    }

    /// Key under which an intent is claimed. `Ignored` is never claimed.
    pub fn for_intent(event_id: &str, intent: &Intent) -> Option<Self> {
        match intent {
            Intent::InitialGrant(grant) => {
                Some(Self::new(IntentKind::InitialGrant, grant.session_id.as_str()))
            }
            Intent::RenewalGrant(renewal) => {
                Some(Self::new(IntentKind::RenewalGrant, renewal.invoice_id.as_str()))
            }
            Intent::Cancelled {
                subscription_id, ..
            } => Some(Self::new(IntentKind::Cancelled, subscription_id.as_str())),
            Intent::StatusChanged { .. } => Some(Self::new(IntentKind::StatusChanged, event_id)),
            Intent::Ignored { .. } => None,
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.external_id)
    }
}
