//! Provider event envelope and payload shapes
//!
//! Events are deserialized from the raw (already verified) webhook body into a
//! thin envelope. The `data.object` payload is kept as JSON until the
//! classifier picks the typed shape that matches the event type.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BillingError, BillingResult};

/// Webhook event envelope: `{id, type, created, data: {object}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub object: Value,
}

impl ProviderEvent {
    /// Parse an event from a webhook body
    pub fn from_payload(payload: &str) -> BillingResult<Self> {
        serde_json::from_str(payload)
            .map_err(|e| BillingError::MalformedEvent(format!("Invalid event payload: {}", e)))
    }

    /// Deserialize `data.object` into a typed payload
    pub fn object<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data.object)
    }
}

/// A reference to another provider object, either as a bare id or expanded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectRef {
    Id(String),
    Object { id: String },
}

impl ObjectRef {
    pub fn id(&self) -> &str {
        match self {
            ObjectRef::Id(id) => id,
            ObjectRef::Object { id } => id,
        }
    }
}

/// `checkout.session` object
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Total charged, in minor currency units
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub subscription: Option<ObjectRef>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
}

/// `invoice` object
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    #[serde(default)]
    pub subscription: Option<ObjectRef>,
    /// Newer API versions move the subscription under `parent`
    #[serde(default)]
    pub parent: Option<InvoiceParent>,
    #[serde(default)]
    pub billing_reason: Option<String>,
    #[serde(default)]
    pub amount_paid: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvoiceParent {
    #[serde(default)]
    pub subscription_details: Option<InvoiceSubscriptionDetails>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvoiceSubscriptionDetails {
    #[serde(default)]
    pub subscription: Option<ObjectRef>,
}

impl InvoiceObject {
    /// Subscription this invoice bills, wherever the API version put it
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription
            .as_ref()
            .or_else(|| {
                self.parent
                    .as_ref()
                    .and_then(|p| p.subscription_details.as_ref())
                    .and_then(|d| d.subscription.as_ref())
            })
            .map(ObjectRef::id)
    }
}

/// `subscription` object (only the fields the engine reads)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub status: String,
}
