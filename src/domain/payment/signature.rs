//! Webhook signature verification.
//!
//! HMAC-SHA256 over the raw payload with a shared secret. Two header shapes
//! are supported: a bare hex digest, and the timestamped
//! `t=<unix>,v1=<hex>` form that signs `"<unix>.<payload>"` and bounds
//! replay by event age.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::domain::foundation::Timestamp;

/// Default maximum age for timestamped signatures (5 minutes).
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Maximum allowed clock skew for signatures from the future (1 minute).
const MAX_CLOCK_SKEW_SECS: i64 = 60;

type HmacSha256 = Hmac<Sha256>;

/// Why a webhook signature was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("malformed signature header: {0}")]
    Malformed(String),

    #[error("signature does not match payload")]
    Mismatch,

    #[error("signature timestamp is older than {0} seconds")]
    TooOld(i64),

    #[error("signature timestamp is in the future")]
    FromFuture,

    #[error("signing secret is not usable")]
    InvalidSecret,
}

/// Parsed components of a `t=<unix>,v1=<hex>` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedSignature {
    pub timestamp: i64,
    pub signatures: Vec<Vec<u8>>,
}

impl TimestampedSignature {
    /// Parses the header. Unknown fields are ignored; several `v1` entries
    /// are allowed during secret rotation.
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| SignatureError::Malformed("expected key=value".to_string()))?;

            match key {
                "t" => {
                    timestamp = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| SignatureError::Malformed("invalid timestamp".to_string()))?,
                    );
                }
                "v1" => {
                    let bytes = hex::decode(value)
                        .map_err(|_| SignatureError::Malformed("invalid v1 hex".to_string()))?;
                    signatures.push(bytes);
                }
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| SignatureError::Malformed("missing timestamp".to_string()))?;
        if signatures.is_empty() {
            return Err(SignatureError::Malformed("missing v1 signature".to_string()));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// HMAC-SHA256 digest of `message` under `secret`.
pub fn hmac_sha256(secret: &[u8], message: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Verifies a bare hex HMAC-SHA256 over the raw payload.
pub fn verify_hex_signature(
    secret: &SecretString,
    payload: &[u8],
    signature_hex: &str,
) -> Result<(), SignatureError> {
    let provided = hex::decode(signature_hex.trim())
        .map_err(|_| SignatureError::Malformed("signature is not hex".to_string()))?;
    let expected = hmac_sha256(secret.expose_secret().as_bytes(), payload)?;
    if constant_time_eq(&expected, &provided) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Hex HMAC-SHA256 over the raw payload.
pub fn sign_hex(secret: &SecretString, payload: &[u8]) -> Result<String, SignatureError> {
    Ok(hex::encode(hmac_sha256(
        secret.expose_secret().as_bytes(),
        payload,
    )?))
}

/// Verifier for `t=<unix>,v1=<hex>` signatures.
#[derive(Clone)]
pub struct TimestampedSignatureVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl TimestampedSignatureVerifier {
    pub fn new(secret: SecretString, tolerance_secs: i64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }

    /// Checks the header against the payload as of `now`.
    pub fn verify(&self, payload: &[u8], header: &str, now: Timestamp) -> Result<(), SignatureError> {
        let parsed = TimestampedSignature::parse(header)?;

        let age = now.as_unix_secs() - parsed.timestamp;
        if age > self.tolerance_secs {
            return Err(SignatureError::TooOld(self.tolerance_secs));
        }
        if age < -MAX_CLOCK_SKEW_SECS {
            return Err(SignatureError::FromFuture);
        }

        let expected = self.compute(parsed.timestamp, payload)?;
        if parsed
            .signatures
            .iter()
            .any(|candidate| constant_time_eq(&expected, candidate))
        {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Builds a header for `payload` signed at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, SignatureError> {
        let digest = self.compute(timestamp, payload)?;
        Ok(format!("t={},v1={}", timestamp, hex::encode(digest)))
    }

    fn compute(&self, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, SignatureError> {
        let mut signed = Vec::with_capacity(payload.len() + 12);
        signed.extend_from_slice(timestamp.to_string().as_bytes());
        signed.push(b'.');
        signed.extend_from_slice(payload);
        hmac_sha256(self.secret.expose_secret().as_bytes(), &signed)
    }
}

impl std::fmt::Debug for TimestampedSignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampedSignatureVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret_12345";
    const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;

    fn secret() -> SecretString {
        SecretString::new(SECRET.to_string())
    }

    fn verifier() -> TimestampedSignatureVerifier {
        TimestampedSignatureVerifier::new(secret(), DEFAULT_TOLERANCE_SECS)
    }

    fn now() -> Timestamp {
        Timestamp::from_unix_secs(1_735_689_600).unwrap()
    }

    #[test]
    fn parse_reads_timestamp_and_signatures() {
        let parsed = TimestampedSignature::parse("t=123,v1=abcd,v0=ffff,v1=0102").unwrap();
        assert_eq!(parsed.timestamp, 123);
        assert_eq!(parsed.signatures, vec![vec![0xab, 0xcd], vec![0x01, 0x02]]);
    }

    #[test]
    fn parse_rejects_missing_parts() {
        assert!(matches!(
            TimestampedSignature::parse("v1=abcd"),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            TimestampedSignature::parse("t=123"),
            Err(SignatureError::Malformed(_))
        ));
        assert!(TimestampedSignature::parse("garbage").is_err());
    }

    #[test]
    fn signed_header_verifies() {
        let header = verifier().sign(PAYLOAD, now().as_unix_secs()).unwrap();
        assert_eq!(verifier().verify(PAYLOAD, &header, now()), Ok(()));
    }

    #[test]
    fn tampered_payload_fails() {
        let header = verifier().sign(PAYLOAD, now().as_unix_secs()).unwrap();
        assert_eq!(
            verifier().verify(b"{\"id\":\"evt_2\"}", &header, now()),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn wrong_secret_fails() {
        let other = TimestampedSignatureVerifier::new(SecretString::new("other".into()), 300);
        let header = other.sign(PAYLOAD, now().as_unix_secs()).unwrap();
        assert_eq!(
            verifier().verify(PAYLOAD, &header, now()),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn stale_signature_fails() {
        let header = verifier().sign(PAYLOAD, now().as_unix_secs() - 301).unwrap();
        assert_eq!(
            verifier().verify(PAYLOAD, &header, now()),
            Err(SignatureError::TooOld(300))
        );
    }

    #[test]
    fn future_signature_beyond_skew_fails() {
        let header = verifier().sign(PAYLOAD, now().as_unix_secs() + 61).unwrap();
        assert_eq!(
            verifier().verify(PAYLOAD, &header, now()),
            Err(SignatureError::FromFuture)
        );
        let within = verifier().sign(PAYLOAD, now().as_unix_secs() + 30).unwrap();
        assert!(verifier().verify(PAYLOAD, &within, now()).is_ok());
    }

    #[test]
    fn hex_signature_round_trip() {
        let signature = sign_hex(&secret(), PAYLOAD).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_hex_signature(&secret(), PAYLOAD, &signature).is_ok());
        assert_eq!(
            verify_hex_signature(&secret(), b"other", &signature),
            Err(SignatureError::Mismatch)
        );
        assert!(matches!(
            verify_hex_signature(&secret(), PAYLOAD, "not-hex"),
            Err(SignatureError::Malformed(_))
        ));
    }

    #[test]
    fn debug_redacts_secret() {
        let rendered = format!("{:?}", verifier());
        assert!(!rendered.contains(SECRET));
    }
}
