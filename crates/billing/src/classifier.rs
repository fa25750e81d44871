//! Event classification
//!
//! Maps a raw provider event onto the closed set of [`Intent`]s the engine
//! knows how to apply. Unrecognized event types become [`Intent::Ignored`];
//! recognized types with payloads that cannot be interpreted are a
//! [`ClassifyError`], which is a processing failure rather than a no-op.

use creditsync_shared::{CheckoutMode, PackageId, SubscriptionStatus, UserId};
use serde_json::Value;
use thiserror::Error;

use crate::error::BillingError;
use crate::events::{CheckoutSessionObject, InvoiceObject, ProviderEvent, SubscriptionObject};

/// `billing_reason` of invoices issued for a regular renewal period
pub const SUBSCRIPTION_CYCLE: &str = "subscription_cycle";

/// Credits purchased through a completed checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialGrant {
    pub session_id: String,
    pub user_id: UserId,
    pub package_id: PackageId,
    pub credits: i64,
    pub mode: CheckoutMode,
    pub amount_paid_cents: i64,
    pub currency: Option<String>,
    /// Present for subscription-mode sessions
    pub subscription_id: Option<String>,
}

/// A paid subscription invoice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalGrant {
    pub invoice_id: String,
    pub subscription_id: String,
    pub billing_reason: String,
    pub amount_paid_cents: i64,
}

impl RenewalGrant {
    /// Only regular cycle invoices grant credits; the first invoice
    /// (`subscription_create`) is covered by the checkout grant.
    pub fn is_subscription_cycle(&self) -> bool {
        self.billing_reason == SUBSCRIPTION_CYCLE
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    InitialGrant(InitialGrant),
    RenewalGrant(RenewalGrant),
    Cancelled {
        subscription_id: String,
        snapshot: Value,
    },
    StatusChanged {
        subscription_id: String,
        provider_status: String,
        status: SubscriptionStatus,
        snapshot: Value,
    },
    Ignored {
        event_type: String,
    },
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::InitialGrant(_) => "initial_grant",
            Intent::RenewalGrant(_) => "renewal_grant",
            Intent::Cancelled { .. } => "cancelled",
            Intent::StatusChanged { .. } => "status_changed",
            Intent::Ignored { .. } => "ignored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("{event_type} payload could not be decoded: {reason}")]
    Payload { event_type: String, reason: String },

    #[error("checkout session {session_id} is missing metadata `{field}`")]
    MissingMetadata {
        session_id: String,
        field: &'static str,
    },

    #[error("checkout session {session_id} has invalid `{field}`: {value:?}")]
    InvalidMetadata {
        session_id: String,
        field: &'static str,
        value: String,
    },

    #[error("subscription checkout session {0} has no subscription")]
    MissingSubscription(String),

    #[error("invoice {0} is not attached to a subscription")]
    InvoiceWithoutSubscription(String),
}

impl From<ClassifyError> for BillingError {
    fn from(err: ClassifyError) -> Self {
        BillingError::MalformedEvent(err.to_string())
    }
}

/// Classify a provider event
pub fn classify(event: &ProviderEvent) -> Result<Intent, ClassifyError> {
    match event.event_type.as_str() {
        "checkout.session.completed" => classify_checkout(event),
        "invoice.payment_succeeded" | "invoice.paid" => classify_invoice(event),
        "customer.subscription.deleted" => {
            let subscription: SubscriptionObject = decode(event)?;
            Ok(Intent::Cancelled {
                subscription_id: subscription.id,
                snapshot: event.data.object.clone(),
            })
        }
        "customer.subscription.updated"
        | "customer.subscription.paused"
        | "customer.subscription.resumed" => {
            let subscription: SubscriptionObject = decode(event)?;
            Ok(Intent::StatusChanged {
                status: SubscriptionStatus::from_provider(&subscription.status),
                subscription_id: subscription.id,
                provider_status: subscription.status,
                snapshot: event.data.object.clone(),
            })
        }
        other => Ok(Intent::Ignored {
            event_type: other.to_string(),
        }),
    }
}

fn decode<T: serde::de::DeserializeOwned>(event: &ProviderEvent) -> Result<T, ClassifyError> {
    event.object().map_err(|e| ClassifyError::Payload {
        event_type: event.event_type.clone(),
        reason: e.to_string(),
    })
}

fn classify_checkout(event: &ProviderEvent) -> Result<Intent, ClassifyError> {
    let session: CheckoutSessionObject = decode(event)?;

    let mode = match session.mode.as_deref() {
        Some("subscription") => CheckoutMode::Subscription,
        Some("payment") => CheckoutMode::Payment,
        _ => {
            return Ok(Intent::Ignored {
                event_type: event.event_type.clone(),
            })
        }
    };

    let user_id = match metadata(&session, "user_id") {
        Ok(raw) => parse_metadata(&session, "user_id", raw)?,
        // Sessions created by this service also carry the user as client_reference_id
        Err(missing) => match session.client_reference_id.as_deref() {
            Some(raw) => parse_metadata(&session, "user_id", raw)?,
            None => return Err(missing),
        },
    };
    let package_id = parse_metadata(&session, "package_id", metadata(&session, "package_id")?)?;
    let credits: i64 = parse_metadata(&session, "credits", metadata(&session, "credits")?)?;
    if credits <= 0 {
        return Err(ClassifyError::InvalidMetadata {
            session_id: session.id,
            field: "credits",
            value: credits.to_string(),
        });
    }

    let subscription_id = session.subscription.as_ref().map(|s| s.id().to_string());
    if mode == CheckoutMode::Subscription && subscription_id.is_none() {
        return Err(ClassifyError::MissingSubscription(session.id));
    }

    Ok(Intent::InitialGrant(InitialGrant {
        user_id: UserId(user_id),
        package_id: PackageId(package_id),
        credits,
        mode,
        amount_paid_cents: session.amount_total.unwrap_or(0).max(0),
        currency: session.currency.clone(),
        subscription_id,
        session_id: session.id,
    }))
}

fn metadata<'a>(
    session: &'a CheckoutSessionObject,
    field: &'static str,
) -> Result<&'a str, ClassifyError> {
    session
        .metadata
        .get(field)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ClassifyError::MissingMetadata {
            session_id: session.id.clone(),
            field,
        })
}

fn parse_metadata(
    session: &CheckoutSessionObject,
    field: &'static str,
    raw: &str,
) -> Result<i64, ClassifyError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ClassifyError::InvalidMetadata {
            session_id: session.id.clone(),
            field,
            value: raw.to_string(),
        })
}

fn classify_invoice(event: &ProviderEvent) -> Result<Intent, ClassifyError> {
    let invoice: InvoiceObject = decode(event)?;
    let subscription_id = invoice
        .subscription_id()
        .map(str::to_string)
        .ok_or_else(|| ClassifyError::InvoiceWithoutSubscription(invoice.id.clone()))?;

    Ok(Intent::RenewalGrant(RenewalGrant {
        subscription_id,
        billing_reason: invoice.billing_reason.unwrap_or_default(),
        amount_paid_cents: invoice.amount_paid.max(0),
        invoice_id: invoice.id,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::events::EventData;
    use serde_json::json;

    fn event(event_type: &str, object: Value) -> ProviderEvent {
        ProviderEvent {
            id: "evt_test".to_string(),
            event_type: event_type.to_string(),
            created: 1_700_000_000,
            data: EventData { object },
        }
    }

    fn checkout(mode: &str, metadata: Value) -> ProviderEvent {
        event(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "mode": mode,
                "metadata": metadata,
                "amount_total": 2000,
                "currency": "pln",
                "subscription": "sub_1",
            }),
        )
    }

    #[test]
    fn test_subscription_checkout_is_initial_grant() {
        let intent = classify(&checkout(
            "subscription",
            json!({"user_id": "42", "package_id": "3", "credits": "100"}),
        ))
        .unwrap();

        assert_eq!(
            intent,
            Intent::InitialGrant(InitialGrant {
                session_id: "cs_1".to_string(),
                user_id: UserId(42),
                package_id: PackageId(3),
                credits: 100,
                mode: CheckoutMode::Subscription,
                amount_paid_cents: 2000,
                currency: Some("pln".to_string()),
                subscription_id: Some("sub_1".to_string()),
            })
        );
    }

    #[test]
    fn test_setup_checkout_is_ignored() {
        let intent = classify(&checkout("setup", json!({}))).unwrap();
        assert!(matches!(intent, Intent::Ignored { .. }));
    }

    #[test]
    fn test_missing_metadata_is_an_error() {
        let err = classify(&checkout(
            "payment",
            json!({"user_id": "42", "credits": "100"}),
        ))
        .unwrap_err();
        assert_eq!(
            err,
            ClassifyError::MissingMetadata {
                session_id: "cs_1".to_string(),
                field: "package_id",
            }
        );
    }

    #[test]
    fn test_non_numeric_and_non_positive_metadata() {
        let err = classify(&checkout(
            "payment",
            json!({"user_id": "abc", "package_id": "3", "credits": "100"}),
        ))
        .unwrap_err();
        assert!(matches!(err, ClassifyError::InvalidMetadata { field: "user_id", .. }));

        let err = classify(&checkout(
            "payment",
            json!({"user_id": "42", "package_id": "3", "credits": "0"}),
        ))
        .unwrap_err();
        assert!(matches!(err, ClassifyError::InvalidMetadata { field: "credits", .. }));
    }

    #[test]
    fn test_user_falls_back_to_client_reference() {
        let intent = classify(&event(
            "checkout.session.completed",
            json!({
                "id": "cs_2",
                "mode": "payment",
                "client_reference_id": "7",
                "metadata": {"package_id": "1", "credits": "50"},
                "amount_total": 500,
            }),
        ))
        .unwrap();
        match intent {
            Intent::InitialGrant(grant) => {
                assert_eq!(grant.user_id, UserId(7));
                assert_eq!(grant.subscription_id, None);
            }
            other => panic!("unexpected intent: {:?}", other),
        }
    }

    #[test]
    fn test_subscription_checkout_without_subscription() {
        let err = classify(&event(
            "checkout.session.completed",
            json!({
                "id": "cs_3",
                "mode": "subscription",
                "metadata": {"user_id": "1", "package_id": "1", "credits": "50"},
            }),
        ))
        .unwrap_err();
        assert_eq!(err, ClassifyError::MissingSubscription("cs_3".to_string()));
    }

    #[test]
    fn test_both_invoice_events_are_renewals() {
        for event_type in ["invoice.payment_succeeded", "invoice.paid"] {
            let intent = classify(&event(
                event_type,
                json!({
                    "id": "in_1",
                    "subscription": "sub_1",
                    "billing_reason": "subscription_cycle",
                    "amount_paid": 2000,
                }),
            ))
            .unwrap();
            match intent {
                Intent::RenewalGrant(renewal) => {
                    assert!(renewal.is_subscription_cycle());
                    assert_eq!(renewal.subscription_id, "sub_1");
                }
                other => panic!("unexpected intent: {:?}", other),
            }
        }
    }

    #[test]
    fn test_first_invoice_is_not_a_cycle() {
        let intent = classify(&event(
            "invoice.paid",
            json!({"id": "in_0", "subscription": "sub_1", "billing_reason": "subscription_create"}),
        ))
        .unwrap();
        match intent {
            Intent::RenewalGrant(renewal) => assert!(!renewal.is_subscription_cycle()),
            other => panic!("unexpected intent: {:?}", other),
        }
    }

    #[test]
    fn test_invoice_without_subscription_is_an_error() {
        let err = classify(&event("invoice.paid", json!({"id": "in_2"}))).unwrap_err();
        assert_eq!(err, ClassifyError::InvoiceWithoutSubscription("in_2".to_string()));
    }

    #[test]
    fn test_subscription_lifecycle_events() {
        let deleted = classify(&event(
            "customer.subscription.deleted",
            json!({"id": "sub_1", "status": "canceled"}),
        ))
        .unwrap();
        assert!(matches!(deleted, Intent::Cancelled { ref subscription_id, .. } if subscription_id == "sub_1"));

        let updated = classify(&event(
            "customer.subscription.updated",
            json!({"id": "sub_1", "status": "past_due"}),
        ))
        .unwrap();
        match updated {
            Intent::StatusChanged {
                status,
                provider_status,
                ..
            } => {
                assert_eq!(provider_status, "past_due");
                assert_eq!(status, SubscriptionStatus::Other("past_due".to_string()));
            }
            other => panic!("unexpected intent: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_types_are_ignored() {
        let intent = classify(&event("customer.created", json!({"id": "cus_1"}))).unwrap();
        assert_eq!(
            intent,
            Intent::Ignored {
                event_type: "customer.created".to_string()
            }
        );
    }

    #[test]
    fn test_undecodable_subscription_is_payload_error() {
        let err = classify(&event("customer.subscription.updated", json!({"id": "sub_1"})))
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Payload { .. }));
        assert!(BillingError::from(err).to_string().starts_with("Malformed billing event"));
    }
}
