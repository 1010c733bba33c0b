//! HMAC-SHA256 signatures for handshakes and webhook traffic.
//!
//! Three distinct uses share the primitive:
//! - outbound handshake frames sign `"<clientId>,<meetingUuid>,<streamId>"`
//!   with the OAuth client secret;
//! - `endpoint.url_validation` echoes the vendor's `plainToken` signed with
//!   the secret token;
//! - every other webhook carries a `v0=<hex>` header over
//!   `v0:<timestamp>:<rawBody>` which must verify before dispatch.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn hmac_hex(key: &str, message: &str) -> String {
    // HMAC accepts keys of any length; new_from_slice only fails for
    // unsupported output sizes, which cannot happen for SHA-256.
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .unwrap_or_else(|_| HmacSha256::new_from_slice(&[]).unwrap());
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Signature for signaling and media handshake frames.
pub fn sign_handshake(
    client_id: &str,
    meeting_uuid: &str,
    stream_id: &str,
    client_secret: &str,
) -> String {
    hmac_hex(
        client_secret,
        &format!("{client_id},{meeting_uuid},{stream_id}"),
    )
}

/// `encryptedToken` for the `endpoint.url_validation` reply.
pub fn validate_url_token(plain_token: &str, secret_token: &str) -> String {
    hmac_hex(secret_token, plain_token)
}

/// Verify a `v0=<hex>` webhook signature header against the raw body.
///
/// Comparison is constant-time via the MAC verifier.
pub fn verify_webhook_signature(
    signature_header: &str,
    timestamp: &str,
    raw_body: &str,
    secret_token: &str,
) -> bool {
    let Some(hex_sig) = signature_header.strip_prefix("v0=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let mut mac = match HmacSha256::new_from_slice(secret_token.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(format!("v0:{timestamp}:{raw_body}").as_bytes());
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_signature_is_deterministic() {
        let a = sign_handshake("client", "UUID-A", "S1", "secret");
        let b = sign_handshake("client", "UUID-A", "S1", "secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn handshake_signature_covers_every_component() {
        let base = sign_handshake("client", "UUID-A", "S1", "secret");
        assert_ne!(base, sign_handshake("other", "UUID-A", "S1", "secret"));
        assert_ne!(base, sign_handshake("client", "UUID-B", "S1", "secret"));
        assert_ne!(base, sign_handshake("client", "UUID-A", "S2", "secret"));
        assert_ne!(base, sign_handshake("client", "UUID-A", "S1", "other"));
    }

    #[test]
    fn url_validation_is_idempotent() {
        let first = validate_url_token("abc123", "s");
        let second = validate_url_token("abc123", "s");
        assert_eq!(first, second);
    }

    #[test]
    fn webhook_signature_round_trips() {
        let body = r#"{"event":"meeting.rtms_started"}"#;
        let ts = "1714000000";
        let sig = format!("v0={}", hmac_hex("tok", &format!("v0:{ts}:{body}")));
        assert!(verify_webhook_signature(&sig, ts, body, "tok"));
    }

    #[test]
    fn webhook_signature_rejects_tampering() {
        let body = r#"{"event":"meeting.rtms_started"}"#;
        let ts = "1714000000";
        let sig = format!("v0={}", hmac_hex("tok", &format!("v0:{ts}:{body}")));
        assert!(!verify_webhook_signature(&sig, ts, "{}", "tok"));
        assert!(!verify_webhook_signature(&sig, "1714000001", body, "tok"));
        assert!(!verify_webhook_signature(&sig, ts, body, "other"));
        assert!(!verify_webhook_signature("v1=00", ts, body, "tok"));
        assert!(!verify_webhook_signature("v0=zz", ts, body, "tok"));
    }
}
