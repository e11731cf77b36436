//! Inbound webhook signature verification.
//!
//! Senders sign the raw request body with HMAC-SHA256 and put the hex digest
//! in the `X-Signature` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a webhook signature over the raw request body.
///
/// Returns `false` for an empty secret or signature. The hex digest is
/// compared case-insensitively in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    if secret.is_empty() || signature.is_empty() {
        warn!(
            has_secret = !secret.is_empty(),
            has_signature = !signature.is_empty(),
            "webhook_signature_missing_fields"
        );
        return false;
    }

    let expected = match sign(secret, body) {
        Some(expected) => expected,
        None => {
            warn!("webhook_signature_invalid_key");
            return false;
        }
    };

    let valid = constant_time_compare(&expected, &signature.to_ascii_lowercase());
    if !valid {
        warn!(
            expected_length = expected.len(),
            actual_length = signature.len(),
            body_length = body.len(),
            "webhook_signature_mismatch"
        );
    }

    valid
}

/// Constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Check if a webhook secret is configured.
pub fn is_signature_verification_enabled(secret: &Option<String>) -> bool {
    secret
        .as_ref()
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"from":"alice@co.com","subject":"Re: Hi"}"#;

    #[test]
    fn test_verify_signature_valid() {
        let signature = sign("webhook-secret", BODY).unwrap();
        assert!(verify_signature("webhook-secret", BODY, &signature));
        assert!(verify_signature(
            "webhook-secret",
            BODY,
            &signature.to_uppercase()
        ));
    }

    #[test]
    fn test_verify_signature_wrong_secret_or_body() {
        let signature = sign("webhook-secret", BODY).unwrap();
        assert!(!verify_signature("other-secret", BODY, &signature));
        assert!(!verify_signature("webhook-secret", b"{}", &signature));
    }

    #[test]
    fn test_verify_signature_missing_fields() {
        assert!(!verify_signature("", BODY, "abc"));
        assert!(!verify_signature("key", BODY, ""));
        assert!(!verify_signature("key", BODY, "   "));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[test]
    fn test_is_signature_verification_enabled() {
        assert!(!is_signature_verification_enabled(&None));
        assert!(!is_signature_verification_enabled(&Some("".to_string())));
        assert!(!is_signature_verification_enabled(&Some("   ".to_string())));
        assert!(is_signature_verification_enabled(&Some("key123".to_string())));
    }
}
