//! Webhook Authentication
//!
//! Authenticates inbound webhook payloads with an HMAC-SHA512 over the raw,
//! unparsed body bytes. The raw body must be preserved byte-for-byte before
//! this step - any re-serialization invalidates every signature. Comparison
//! is constant-time via the `hmac` verification API.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;

use classpay_core::{EngineError, Result};

type HmacSha512 = Hmac<Sha512>;

/// Parsed, authenticated webhook event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Provider reports a successful charge - triggers reconciliation
    ChargeSucceeded { reference: String },

    /// Provider reports a failed charge - bookkeeping only, no state change
    ChargeFailed { reference: String },

    /// Authenticated but not an event we act on
    Unhandled { event_type: String },
}

impl WebhookEvent {
    /// Event type label for audit records
    pub fn event_type(&self) -> &str {
        match self {
            WebhookEvent::ChargeSucceeded { .. } => "charge.success",
            WebhookEvent::ChargeFailed { .. } => "charge.failed",
            WebhookEvent::Unhandled { event_type } => event_type,
        }
    }

    /// Transaction reference, when the event carries one
    pub fn reference(&self) -> Option<&str> {
        match self {
            WebhookEvent::ChargeSucceeded { reference }
            | WebhookEvent::ChargeFailed { reference } => Some(reference),
            WebhookEvent::Unhandled { .. } => None,
        }
    }
}

#[derive(Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    data: WebhookData,
}

#[derive(Deserialize, Default)]
struct WebhookData {
    #[serde(default)]
    reference: Option<String>,
}

/// Compute the hex HMAC-SHA512 signature for a body (test and tooling helper)
pub fn sign_body(webhook_secret: &str, raw_body: &[u8]) -> String {
    let mut mac = HmacSha512::new_from_slice(webhook_secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

/// Authenticate a webhook payload and parse it into an event.
///
/// Fails with `Authentication` on a missing, malformed, or mismatched
/// signature; business logic is never reached in that case. Unknown event
/// types authenticate successfully and come back as `Unhandled`.
pub fn authenticate_webhook(
    webhook_secret: &str,
    raw_body: &[u8],
    signature_header: &str,
) -> Result<WebhookEvent> {
    let signature = hex::decode(signature_header.trim())
        .map_err(|_| EngineError::Authentication("signature is not valid hex".into()))?;

    let mut mac = HmacSha512::new_from_slice(webhook_secret.as_bytes())
        .map_err(|e| EngineError::Authentication(e.to_string()))?;
    mac.update(raw_body);
    mac.verify_slice(&signature)
        .map_err(|_| EngineError::Authentication("signature mismatch".into()))?;

    let envelope: WebhookEnvelope = serde_json::from_slice(raw_body)?;

    let event = match (envelope.event.as_str(), envelope.data.reference) {
        ("charge.success", Some(reference)) => WebhookEvent::ChargeSucceeded { reference },
        ("charge.failed", Some(reference)) => WebhookEvent::ChargeFailed { reference },
        (other, _) => WebhookEvent::Unhandled {
            event_type: other.to_string(),
        },
    };

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn body(event: &str, reference: &str) -> Vec<u8> {
        serde_json::json!({
            "event": event,
            "data": { "reference": reference, "amount": 150_000 }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_valid_signature_parses_charge_success() {
        let body = body("charge.success", "cp_abc");
        let signature = sign_body(SECRET, &body);

        let event = authenticate_webhook(SECRET, &body, &signature).unwrap();
        assert_eq!(
            event,
            WebhookEvent::ChargeSucceeded {
                reference: "cp_abc".into()
            }
        );
    }

    #[test]
    fn test_tampered_byte_is_rejected() {
        let body = body("charge.success", "cp_abc");
        let signature = sign_body(SECRET, &body);

        let mut tampered = body.clone();
        tampered[10] ^= 0x01;

        let err = authenticate_webhook(SECRET, &tampered, &signature).unwrap_err();
        assert!(matches!(err, EngineError::Authentication(_)));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let body = body("charge.success", "cp_abc");
        let signature = sign_body("whsec_other", &body);

        let err = authenticate_webhook(SECRET, &body, &signature).unwrap_err();
        assert!(matches!(err, EngineError::Authentication(_)));
    }

    #[test]
    fn test_non_hex_signature_is_rejected() {
        let body = body("charge.success", "cp_abc");
        let err = authenticate_webhook(SECRET, &body, "not-hex!").unwrap_err();
        assert!(matches!(err, EngineError::Authentication(_)));
    }

    #[test]
    fn test_unknown_event_authenticates_as_unhandled() {
        let body = body("transfer.success", "tr_123");
        let signature = sign_body(SECRET, &body);

        let event = authenticate_webhook(SECRET, &body, &signature).unwrap();
        assert_eq!(
            event,
            WebhookEvent::Unhandled {
                event_type: "transfer.success".into()
            }
        );
    }

    #[test]
    fn test_charge_failed_parses() {
        let body = body("charge.failed", "cp_abc");
        let signature = sign_body(SECRET, &body);

        let event = authenticate_webhook(SECRET, &body, &signature).unwrap();
        assert_eq!(event.reference(), Some("cp_abc"));
        assert_eq!(event.event_type(), "charge.failed");
    }
}
