//! Zero-knowledge envelope detection and structural validation.
//!
//! The server never possesses the passphrase for a `$ZK$` envelope; its
//! only duties are to detect the sentinel prefix and, for secret-path
//! writes, validate that the envelope is *structurally* plausible
//! before storing it verbatim.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// The sentinel prefix marking a zero-knowledge envelope.
pub const ZK_PREFIX: &str = "$ZK$";

/// Minimum decoded length of a `$ZK$` payload: salt(16) + nonce(12) + tag(16).
const MIN_DECODED_LEN: usize = 16 + 12 + 16;

/// Whether `value` begins with the `$ZK$` sentinel.
pub fn is_zk_envelope(value: &[u8]) -> bool {
    value.starts_with(ZK_PREFIX.as_bytes())
}

/// Validate that a `$ZK$`-prefixed value is structurally well formed:
/// the remainder base64-decodes, and the decoded length is at least
/// `salt(16) + nonce(12) + tag(16)` bytes. This never attempts
/// decryption — the server does not have the key.
pub fn validate_zk_envelope(value: &[u8]) -> bool {
    let Some(rest) = value.strip_prefix(ZK_PREFIX.as_bytes()) else {
        return false;
    };
    let Ok(rest_str) = std::str::from_utf8(rest) else {
        return false;
    };
    match BASE64.decode(rest_str) {
        Ok(decoded) => decoded.len() >= MIN_DECODED_LEN,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_envelope(payload_len: usize) -> Vec<u8> {
        let payload = vec![0u8; payload_len];
        let mut out = ZK_PREFIX.as_bytes().to_vec();
        out.extend_from_slice(BASE64.encode(payload).as_bytes());
        out
    }

    #[test]
    fn detects_sentinel() {
        assert!(is_zk_envelope(b"$ZK$abc"));
        assert!(!is_zk_envelope(b"plain"));
    }

    #[test]
    fn valid_envelope_passes() {
        let v = make_envelope(MIN_DECODED_LEN);
        assert!(validate_zk_envelope(&v));
    }

    #[test]
    fn envelope_below_minimum_length_fails() {
        let v = make_envelope(MIN_DECODED_LEN - 1);
        assert!(!validate_zk_envelope(&v));
    }

    #[test]
    fn non_base64_body_fails() {
        let v = b"$ZK$not-base64!!!".to_vec();
        assert!(!validate_zk_envelope(&v));
    }

    #[test]
    fn missing_prefix_fails() {
        assert!(!validate_zk_envelope(b"no-prefix-here"));
    }
}
