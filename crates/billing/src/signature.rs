//! Webhook signature verification
//!
//! Stripe signs `"{timestamp}.{raw_body}"` with HMAC-SHA256 keyed by the
//! endpoint secret and sends `t=<timestamp>,v1=<hex>[,v1=<hex>...]` in the
//! `stripe-signature` header. Verification is done by hand rather than through
//! async-stripe so that events from newer API versions are not rejected at
//! parse time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Parsed `stripe-signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

/// Parse the signature header: `t=timestamp,v1=signature,v0=signature`
pub fn parse_signature_header(header: &str) -> BillingResult<SignatureHeader> {
    let mut timestamp: Option<i64> = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        BillingError::WebhookSignatureInvalid(
            "Unable to extract timestamp and signatures from header".to_string(),
        )
    })?;

    if signatures.is_empty() {
        return Err(BillingError::WebhookSignatureInvalid(
            "No signatures found with expected scheme".to_string(),
        ));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

/// Compute the hex-encoded v1 signature for a payload
pub fn compute_signature(secret: &str, timestamp: i64, payload: &str) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| {
        BillingError::WebhookSignatureInvalid("Invalid webhook secret key".to_string())
    })?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a signature header for a payload, as the provider would send it
pub fn signature_header(secret: &str, timestamp: i64, payload: &str) -> BillingResult<String> {
    let signature = compute_signature(secret, timestamp, payload)?;
    Ok(format!("t={},v1={}", timestamp, signature))
}

/// Verify a signed payload against the endpoint secret.
///
/// `now` is the current unix time in seconds; the header timestamp must lie
/// within `tolerance_secs` of it.
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> BillingResult<()> {
    let parsed = parse_signature_header(header)?;

    let diff = now.abs_diff(parsed.timestamp);
    if diff > tolerance_secs.unsigned_abs() {
        tracing::warn!(
            timestamp = parsed.timestamp,
            now = now,
            diff = diff,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid(
            "Timestamp outside the tolerance zone".to_string(),
        ));
    }

    let expected = compute_signature(secret, parsed.timestamp, payload)?;
    let matched = parsed
        .signatures
        .iter()
        .any(|candidate| bool::from(candidate.as_bytes().ct_eq(expected.as_bytes())));

    if !matched {
        return Err(BillingError::WebhookSignatureInvalid(
            "No signatures found matching the expected signature for payload".to_string(),
        ));
    }

    Ok(())
}
