use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub(super) const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
pub(super) const SIGNATURE_HEADER: &str = "x-webhook-signature";
const TOLERANCE_SECS: u64 = 60 * 5;

/// Checks the inbound webhook signature: hex HMAC-SHA256 of
/// `"{timestamp}.{body}"`. Without a secret only non-production runs pass.
pub(super) fn verify_inbound(
    headers: &HeaderMap,
    body: &[u8],
    secret: Option<&str>,
    production: bool,
) -> Result<(), &'static str> {
    let Some(secret) = secret.filter(|value| !value.trim().is_empty()) else {
        if production {
            return Err("secret_not_configured");
        }
        return Ok(());
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or("missing_signature")?;
    let timestamp = headers
        .get(TIMESTAMP_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or("missing_timestamp")?;
    let timestamp_value: i64 = timestamp.trim().parse().map_err(|_| "invalid_timestamp")?;

    if unix_now().abs_diff(timestamp_value) > TOLERANCE_SECS {
        return Err("stale_timestamp");
    }

    let provided = hex::decode(signature.trim()).map_err(|_| "invalid_signature")?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| "bad_secret")?;
    mac.update(timestamp.trim().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac.verify_slice(&provided).map_err(|_| "invalid_signature")
}

#[cfg(test)]
fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub(super) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn signed_headers(secret: &str, timestamp: i64, body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            TIMESTAMP_HEADER,
            HeaderValue::from_str(&timestamp.to_string()).unwrap(),
        );
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&sign(secret, timestamp, body)).unwrap(),
        );
        headers
    }

    #[test]
    fn accepts_a_fresh_valid_signature() {
        let body = br#"{"From":"a@example.com"}"#;
        let headers = signed_headers("s3cret", unix_now(), body);
        assert_eq!(verify_inbound(&headers, body, Some("s3cret"), true), Ok(()));
    }

    #[test]
    fn rejects_tampered_body_and_wrong_secret() {
        let body = br#"{"From":"a@example.com"}"#;
        let headers = signed_headers("s3cret", unix_now(), body);
        assert_eq!(
            verify_inbound(&headers, b"{}", Some("s3cret"), false),
            Err("invalid_signature")
        );
        assert_eq!(
            verify_inbound(&headers, body, Some("other"), false),
            Err("invalid_signature")
        );
    }

    #[test]
    fn rejects_stale_timestamps() {
        let body = b"{}";
        let headers = signed_headers("s3cret", unix_now() - 600, body);
        assert_eq!(
            verify_inbound(&headers, body, Some("s3cret"), false),
            Err("stale_timestamp")
        );
    }

    #[test]
    fn extreme_timestamps_are_stale() {
        let body = b"{}";
        for timestamp in [i64::MIN, i64::MAX] {
            let headers = signed_headers("s3cret", timestamp, body);
            assert_eq!(
                verify_inbound(&headers, body, Some("s3cret"), true),
                Err("stale_timestamp")
            );
        }
    }

    #[test]
    fn missing_secret_depends_on_environment() {
        let headers = HeaderMap::new();
        assert_eq!(verify_inbound(&headers, b"{}", None, false), Ok(()));
        assert_eq!(
            verify_inbound(&headers, b"{}", None, true),
            Err("secret_not_configured")
        );
        assert_eq!(
            verify_inbound(&headers, b"{}", Some("s3cret"), false),
            Err("missing_signature")
        );
    }
}
