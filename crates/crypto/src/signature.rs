//! Ed25519 signature verification over raw bytes and canonical JSON.

use base64::Engine;
use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH};
use serde_json::Value;

use crate::canonical_json::signable_json;
use crate::encoding::BASE64;
use crate::error::CryptoError;

/// Parse a base64 Ed25519 public key (padded or unpadded).
pub fn parse_verifying_key(key: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = BASE64
        .decode(key)
        .map_err(|e| CryptoError::InvalidEncoding(format!("invalid base64 ed25519 key: {e}")))?;

    let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
        CryptoError::InvalidEncoding(format!(
            "expected {PUBLIC_KEY_LENGTH}-byte ed25519 key, got {} bytes",
            bytes.len()
        ))
    })?;

    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| CryptoError::InvalidEncoding(format!("invalid ed25519 key: {e}")))
}

fn parse_signature(signature: &str) -> Result<Signature, CryptoError> {
    let bytes = BASE64
        .decode(signature)
        .map_err(|e| CryptoError::InvalidEncoding(format!("invalid base64 signature: {e}")))?;
    Signature::from_slice(&bytes).map_err(|_| {
        CryptoError::InvalidEncoding(format!(
            "expected 64-byte signature, got {} bytes",
            bytes.len()
        ))
    })
}

/// Verify `signature` over `message` with the given base64 Ed25519 key.
pub fn verify_signature(key: &str, message: &[u8], signature: &str) -> Result<(), CryptoError> {
    let key = parse_verifying_key(key)?;
    let signature = parse_signature(signature)?;
    key.verify_strict(message, &signature)
        .map_err(|_| CryptoError::SignatureMismatch("ed25519 verification failed".into()))
}

/// Verify a signature made over the canonical JSON form of `value`.
///
/// Top-level `signatures` and `unsigned` members are ignored, so an object
/// still verifies after its signature has been attached to it.
pub fn verify_json_signature(key: &str, value: &Value, signature: &str) -> Result<(), CryptoError> {
    let canonical = signable_json(value)?;
    verify_signature(key, canonical.as_bytes(), signature)
}

pub fn is_valid_signature(key: &str, message: &[u8], signature: &str) -> bool {
    verify_signature(key, message, signature).is_ok()
}
