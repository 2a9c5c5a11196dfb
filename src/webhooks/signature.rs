use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed timestamp before the delivery is treated as a
/// replay.
pub const TOLERANCE_SECS: i64 = 300;

/// Verify a `t=<unix>,v1=<hex>` signature header against the raw request
/// body. The signed payload is `"{t}.{body}"`; comparison is constant-time.
/// Nothing durable may happen before this passes.
pub fn verify(secret: &str, header: &str, body: &[u8], now_unix: i64) -> Result<()> {
    let (timestamp, candidates) = parse_header(header)?;

    if (now_unix - timestamp).abs() > TOLERANCE_SECS {
        return Err(AppError::Signature("timestamp outside tolerance".to_string()));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("invalid webhook secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    for candidate in &candidates {
        if expected.as_bytes().ct_eq(candidate.as_bytes()).into() {
            return Ok(());
        }
    }

    Err(AppError::Signature("no matching signature".to_string()))
}

/// Compute the signature header for a body; used by tests and local tools
/// to forge deliveries against a known secret.
pub fn sign(secret: &str, body: &[u8], timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

fn parse_header(header: &str) -> Result<(i64, Vec<String>)> {
    let mut timestamp: Option<i64> = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(
                    value
                        .parse()
                        .map_err(|_| AppError::Signature("malformed timestamp".to_string()))?,
                );
            }
            Some(("v1", value)) => candidates.push(value.to_string()),
            // Unknown schemes (v0, ...) are ignored.
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| AppError::Signature("missing timestamp".to_string()))?;
    if candidates.is_empty() {
        return Err(AppError::Signature("missing v1 signature".to_string()));
    }

    Ok((timestamp, candidates))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign(SECRET, body, 1_700_000_000);

        assert!(verify(SECRET, &header, body, 1_700_000_000).is_ok());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign("wrong_secret", body, 1_700_000_000);

        assert!(verify(SECRET, &header, body, 1_700_000_000).is_err());
    }

    #[test]
    fn modified_body_is_rejected() {
        let body = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign(SECRET, body, 1_700_000_000);

        let tampered = br#"{"type":"payment_intent.succeeded","extra":true}"#;
        assert!(verify(SECRET, &header, tampered, 1_700_000_000).is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let body = br#"{}"#;
        let header = sign(SECRET, body, 1_700_000_000);

        assert!(verify(SECRET, &header, body, 1_700_000_000 + TOLERANCE_SECS + 1).is_err());
    }

    #[test]
    fn header_without_timestamp_is_rejected() {
        assert!(verify(SECRET, "v1=deadbeef", b"{}", 1_700_000_000).is_err());
    }

    #[test]
    fn extra_signature_schemes_are_ignored() {
        let body = br#"{}"#;
        let signed = sign(SECRET, body, 1_700_000_000);
        let header = format!("{},v0=ignored", signed);

        assert!(verify(SECRET, &header, body, 1_700_000_000).is_ok());
    }
}
