//! Inbound webhook authentication and parsing.
//!
//! The provider signs the exact bytes of the request body with HMAC-SHA256 and
//! sends the hex digest in the `signature` header. Verification must happen on
//! the raw body before anything is deserialized.

use hmac::{Hmac, Mac};
use koi_core::PaymentIntentId;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "signature";

const SIGNATURE_PREFIX: &str = "sha256=";

type HmacSha256 = Hmac<Sha256>;

/// Check a webhook signature.
///
/// Accepts the bare hex digest or one prefixed with `sha256=`. Returns `false`
/// for a missing or malformed signature, an empty secret, or a mismatch. The
/// comparison is constant time.
#[must_use]
pub fn verify(payload: &[u8], signature: Option<&str>, secret: &SecretString) -> bool {
    let Some(signature) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
        return false;
    };
    let secret = secret.expose_secret();
    if secret.is_empty() {
        return false;
    }

    let hex_digest = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Sign a payload the way the provider does. Used by tooling and tests.
///
/// # Errors
///
/// Returns `WebhookError::InvalidSecret` for an empty secret, which [`verify`]
/// would never accept.
pub fn sign(payload: &[u8], secret: &SecretString) -> Result<String, WebhookError> {
    let secret = secret.expose_secret();
    if secret.is_empty() {
        return Err(WebhookError::InvalidSecret);
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSecret)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Errors from parsing an authenticated webhook body.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("malformed webhook payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("webhook payload has an empty intent id")]
    MissingIntent,

    #[error("webhook secret cannot be used as a signing key")]
    InvalidSecret,
}

/// The kinds of event the service acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventKind {
    PaymentSucceeded,
    PaymentFailed,
    PaymentCancelled,
    /// Anything else; acknowledged without effect.
    Other(String),
}

impl WebhookEventKind {
    fn from_type(event_type: &str) -> Self {
        match event_type {
            "payment_intent.succeeded" => Self::PaymentSucceeded,
            "payment_intent.failed" | "payment_intent.payment_failed" => Self::PaymentFailed,
            "payment_intent.cancelled" | "payment_intent.canceled" => Self::PaymentCancelled,
            other => Self::Other(other.to_string()),
        }
    }
}

/// An authenticated provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    /// Provider event id, when sent.
    pub id: Option<String>,
    pub kind: WebhookEventKind,
    pub intent_id: PaymentIntentId,
    /// Provider-supplied failure explanation, if any.
    pub failure_reason: Option<String>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    id: String,
    #[serde(default)]
    failure_reason: Option<String>,
    #[serde(default)]
    last_payment_error: Option<RawPaymentError>,
}

#[derive(Deserialize)]
struct RawPaymentError {
    #[serde(default)]
    message: Option<String>,
}

/// Parse a verified webhook body of the form `{type, data: {id, ...}}`.
///
/// # Errors
///
/// Returns `WebhookError` if the body is not valid JSON of that shape.
pub fn parse(payload: &[u8]) -> Result<WebhookEvent, WebhookError> {
    let raw: RawEvent = serde_json::from_slice(payload)?;

    let intent_id = raw.data.id.trim();
    if intent_id.is_empty() {
        return Err(WebhookError::MissingIntent);
    }

    let failure_reason = raw
        .data
        .failure_reason
        .or_else(|| raw.data.last_payment_error.and_then(|e| e.message));

    Ok(WebhookEvent {
        id: raw.id,
        kind: WebhookEventKind::from_type(&raw.event_type),
        intent_id: PaymentIntentId::new(intent_id),
        failure_reason,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn secret() -> SecretString {
        SecretString::from("whsec_test_key")
    }

    const BODY: &[u8] = br#"{"type":"payment_intent.succeeded","data":{"id":"pi_1"}}"#;

    #[test]
    fn test_verify_accepts_valid_signature() {
        let signature = sign(BODY, &secret()).unwrap();
        assert!(verify(BODY, Some(&signature), &secret()));
        assert!(verify(BODY, Some(&format!("sha256={signature}")), &secret()));
    }

    #[test]
    fn test_verify_rejects_tampered_body() {
        let signature = sign(BODY, &secret()).unwrap();
        let tampered = br#"{"type":"payment_intent.succeeded","data":{"id":"pi_2"}}"#;
        assert!(!verify(tampered, Some(&signature), &secret()));
    }

    #[test]
    fn test_verify_is_byte_exact() {
        // Same JSON value, different bytes
        let signature = sign(BODY, &secret()).unwrap();
        let reformatted = br#"{ "type": "payment_intent.succeeded", "data": { "id": "pi_1" } }"#;
        assert!(!verify(reformatted, Some(&signature), &secret()));
    }

    #[test]
    fn test_verify_rejects_missing_or_garbage() {
        assert!(!verify(BODY, None, &secret()));
        assert!(!verify(BODY, Some(""), &secret()));
        assert!(!verify(BODY, Some("not-hex"), &secret()));
        assert!(!verify(BODY, Some("abcd"), &secret()));
    }

    #[test]
    fn test_verify_rejects_wrong_or_empty_secret() {
        let signature = sign(BODY, &secret()).unwrap();
        assert!(!verify(BODY, Some(&signature), &SecretString::from("other")));
    }

    #[test]
    fn test_sign_rejects_empty_secret() {
        let empty = SecretString::from("");
        assert!(matches!(sign(BODY, &empty), Err(WebhookError::InvalidSecret)));
        let signature = sign(BODY, &secret()).unwrap();
        assert!(!verify(BODY, Some(&signature), &empty));
    }

    #[test]
    fn test_parse_event_kinds() {
        let event = parse(BODY).unwrap();
        assert_eq!(event.kind, WebhookEventKind::PaymentSucceeded);
        assert_eq!(event.intent_id.as_str(), "pi_1");

        let event =
            parse(br#"{"type":"payment_intent.canceled","data":{"id":"pi_1"}}"#).unwrap();
        assert_eq!(event.kind, WebhookEventKind::PaymentCancelled);

        let event = parse(br#"{"type":"charge.dispute.created","data":{"id":"pi_1"}}"#).unwrap();
        assert_eq!(
            event.kind,
            WebhookEventKind::Other("charge.dispute.created".to_string())
        );
    }

    #[test]
    fn test_parse_failure_reason() {
        let event = parse(
            br#"{"id":"evt_9","type":"payment_intent.failed","data":{"id":"pi_1","last_payment_error":{"message":"card declined"}}}"#,
        )
        .unwrap();
        assert_eq!(event.kind, WebhookEventKind::PaymentFailed);
        assert_eq!(event.id.as_deref(), Some("evt_9"));
        assert_eq!(event.failure_reason.as_deref(), Some("card declined"));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(parse(b"not json"), Err(WebhookError::Malformed(_))));
        assert!(matches!(
            parse(br#"{"type":"payment_intent.succeeded"}"#),
            Err(WebhookError::Malformed(_))
        ));
        assert!(matches!(
            parse(br#"{"type":"payment_intent.succeeded","data":{"id":" "}}"#),
            Err(WebhookError::MissingIntent)
        ));
    }
}
