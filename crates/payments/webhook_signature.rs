use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";
pub const EVENT_ID_HEADER: &str = "x-razorpay-event-id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is missing")]
    Missing,
    #[error("webhook secret is not usable as an hmac key")]
    InvalidKey,
    #[error("signature does not match payload")]
    Mismatch,
}

/// Hex HMAC-SHA256 of `payload`, the value the gateway sends in the signature header.
pub fn compute_signature(secret: &str, payload: &[u8]) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks the hex HMAC-SHA256 of the raw request body against the signature header.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    signature: Option<&str>,
) -> Result<(), SignatureError> {
    let signature = signature
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(SignatureError::Missing)?;

    let expected = compute_signature(secret, payload)?;
    let provided = signature.to_ascii_lowercase();

    if expected.as_bytes().ct_eq(provided.as_bytes()).into() {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// The gateway's event id header when present, otherwise a sha256 fingerprint of the body so
/// redeliveries of the same bytes still collapse onto one ledger row.
pub fn webhook_event_id(payload: &[u8], event_id_header: Option<&str>) -> String {
    match event_id_header.map(str::trim).filter(|value| !value.is_empty()) {
        Some(event_id) => event_id.to_string(),
        None => hex::encode(Sha256::digest(payload)),
    }
}
