//! Shared-secret webhook signatures.
//!
//! Header format: `t=<unix seconds>,v1=<hex HMAC-SHA256 of "<t>.<payload>">`.
//! Several `v1` entries may be present while a secret is being rotated; the
//! header is valid if any of them matches.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct WebhookSigner {
    secret: Vec<u8>,
    /// Maximum age of the signed timestamp. `None` accepts any age.
    tolerance: Option<Duration>,
}

struct ParsedHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

fn parse_header(header: &str) -> Option<ParsedHeader<'_>> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }
    Some(ParsedHeader {
        timestamp: timestamp?,
        signatures,
    })
}

impl WebhookSigner {
    pub fn new(secret: impl Into<Vec<u8>>, tolerance: Option<Duration>) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac
    }

    /// Produces the header a processor would send for `payload` at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        let digest = self.mac(timestamp, payload).finalize().into_bytes();
        format!("t={},v1={}", timestamp, hex::encode(digest))
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> bool {
        self.verify_at(payload, header, Utc::now())
    }

    pub fn verify_at(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> bool {
        let Some(parsed) = parse_header(header) else {
            return false;
        };
        if let Some(tolerance) = self.tolerance {
            let age = now.timestamp().abs_diff(parsed.timestamp);
            if age > tolerance.as_secs() {
                return false;
            }
        }
        parsed.signatures.iter().any(|candidate| {
            let Ok(expected) = hex::decode(candidate) else {
                return false;
            };
            // verify_slice compares in constant time
            self.mac(parsed.timestamp, payload).verify_slice(&expected).is_ok()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"charge.refunded","data":{"payment_id":"p1"}}"#;

    #[test]
    fn test_sign_then_verify() {
        let signer = WebhookSigner::new("whsec_test", None);
        let header = signer.sign(PAYLOAD, 1_700_000_000);
        assert!(header.starts_with("t=1700000000,v1="));
        assert!(signer.verify(PAYLOAD, &header));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let signer = WebhookSigner::new("whsec_test", None);
        let header = signer.sign(PAYLOAD, 1_700_000_000);
        let tampered = br#"{"id":"evt_1","type":"charge.refunded","data":{"payment_id":"p2"}}"#;
        assert!(!signer.verify(tampered, &header));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let header = WebhookSigner::new("whsec_other", None).sign(PAYLOAD, 1_700_000_000);
        assert!(!WebhookSigner::new("whsec_test", None).verify(PAYLOAD, &header));
    }

    #[test]
    fn test_garbage_headers_fail() {
        let signer = WebhookSigner::new("whsec_test", None);
        assert!(!signer.verify(PAYLOAD, ""));
        assert!(!signer.verify(PAYLOAD, "v1=abcd"));
        assert!(!signer.verify(PAYLOAD, "t=notanumber,v1=abcd"));
        assert!(!signer.verify(PAYLOAD, "t=1700000000,v1=zz"));
        assert!(!signer.verify(PAYLOAD, "t=1700000000"));
    }

    #[test]
    fn test_rotation_accepts_any_matching_signature() {
        let signer = WebhookSigner::new("whsec_test", None);
        let valid = signer.sign(PAYLOAD, 1_700_000_000);
        let v1 = valid.split_once("v1=").unwrap().1;
        let header = format!("t=1700000000,v1={},v1={}", "00".repeat(32), v1);
        assert!(signer.verify(PAYLOAD, &header));
    }

    #[test]
    fn test_tolerance_window() {
        let signer = WebhookSigner::new("whsec_test", Some(Duration::from_secs(300)));
        let now = Utc::now();
        let fresh = signer.sign(PAYLOAD, now.timestamp() - 10);
        let stale = signer.sign(PAYLOAD, now.timestamp() - 3600);
        assert!(signer.verify_at(PAYLOAD, &fresh, now));
        assert!(!signer.verify_at(PAYLOAD, &stale, now));
    }
}
