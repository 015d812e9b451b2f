//! Cryptographic helpers for webhook and key verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 of `message` under `secret`, hex-encoded (64 characters).
///
/// # Panics
///
/// Never in practice: HMAC accepts keys of any size (RFC 2104), so
/// `new_from_slice` cannot fail for SHA-256.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> String {
    // INVARIANT: HMAC-SHA256 accepts keys of any size.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC-SHA256 accepts any key size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Check a hex signature of `message`, ignoring case and an optional
/// `sha256=` prefix.
#[must_use]
pub fn verify_signature(secret: &str, message: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    constant_time_eq(
        &hmac_sha256_hex(secret, message),
        &signature.to_ascii_lowercase(),
    )
}

/// Compare two strings without short-circuiting on the first difference.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_matches_rfc_4231_case_2() {
        assert_eq!(
            hmac_sha256_hex("Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn signature_accepts_prefix_and_uppercase() {
        let body = br#"{"event_type":"payment.succeeded"}"#;
        let sig = hmac_sha256_hex("whsec", body);
        assert!(verify_signature("whsec", body, &sig));
        assert!(verify_signature("whsec", body, &format!("sha256={}", sig.to_uppercase())));
        assert!(!verify_signature("other", body, &sig));
        assert!(!verify_signature("whsec", b"tampered", &sig));
    }

    #[test]
    fn constant_time_eq_behaves_like_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }
}
