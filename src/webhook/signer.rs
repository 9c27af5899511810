use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Secret used when an endpoint is registered without one in local testing.
pub const DEFAULT_TEST_SECRET: &str = "whsec_paymock_default_test_secret";

/// Signature header value: `t=<unix_ts>,v1=<hex HMAC-SHA256 of "<ts>.<body>">`.
pub fn sign_payload(secret: &str, timestamp: i64, body: &str) -> String {
    let signed_content = format!("{}.{}", timestamp, body);
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(signed_content.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("t={},v1={}", timestamp, signature)
}

/// Recompute and compare a signature header produced by [`sign_payload`].
pub fn verify_signature(secret: &str, header: &str, body: &str) -> bool {
    let Some((ts_part, sig_part)) = header.split_once(',') else {
        return false;
    };
    let Some(timestamp) = ts_part.strip_prefix("t=").and_then(|t| t.parse::<i64>().ok()) else {
        return false;
    };
    let Some(expected_hex) = sig_part.strip_prefix("v1=") else {
        return false;
    };
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let signed_content = format!("{}.{}", timestamp, body);
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(signed_content.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic() {
        let sig1 = sign_payload("whsec_test_secret", 1706500000, r#"{"id":"evt_1"}"#);
        let sig2 = sign_payload("whsec_test_secret", 1706500000, r#"{"id":"evt_1"}"#);
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn signature_has_correct_format() {
        let sig = sign_payload("whsec_test_secret", 1706500000, r#"{"id":"evt_1"}"#);
        assert!(sig.starts_with("t=1706500000,v1="));
        let hex_part = sig.strip_prefix("t=1706500000,v1=").unwrap();
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_changes_with_each_input() {
        let base = sign_payload("whsec_a", 1706500000, r#"{"id":"evt_1"}"#);
        assert_ne!(base, sign_payload("whsec_b", 1706500000, r#"{"id":"evt_1"}"#));
        assert_ne!(base, sign_payload("whsec_a", 1706500001, r#"{"id":"evt_1"}"#));
        assert_ne!(base, sign_payload("whsec_a", 1706500000, r#"{"id":"evt_2"}"#));
    }

    #[test]
    fn verify_accepts_own_signatures() {
        let body = r#"{"id":"evt_1","type":"invoice.paid"}"#;
        let header = sign_payload(DEFAULT_TEST_SECRET, 1706500000, body);
        assert!(verify_signature(DEFAULT_TEST_SECRET, &header, body));
    }

    #[test]
    fn verify_rejects_tampering() {
        let body = r#"{"id":"evt_1"}"#;
        let header = sign_payload("whsec_secret", 1706500000, body);
        assert!(!verify_signature("whsec_other", &header, body));
        assert!(!verify_signature("whsec_secret", &header, r#"{"id":"evt_2"}"#));
        assert!(!verify_signature("whsec_secret", "t=abc,v1=00", body));
        assert!(!verify_signature("whsec_secret", "garbage", body));
    }
}
