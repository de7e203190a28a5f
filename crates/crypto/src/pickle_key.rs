//! Pickle key management for olmdev-crypto.
//!
//! Account and session state is persisted as vodozemac pickles encrypted
//! with a 32-byte pickle key. The key itself never touches the key store.

use base64::Engine;
use zeroize::{Zeroize, ZeroizeOnDrop};

use olmdev_shared::constants::PICKLE_KEY_LENGTH;

use crate::encoding::BASE64;
use crate::error::CryptoError;

/// A 32-byte pickle key, securely wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PickleKey {
    key: [u8; PICKLE_KEY_LENGTH],
}

impl std::fmt::Debug for PickleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PickleKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl PickleKey {
    pub fn from_bytes(key: [u8; PICKLE_KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Decode a base64 pickle key (padded or unpadded).
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let mut bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidEncoding(format!("pickle key: {e}")))?;
        if bytes.len() != PICKLE_KEY_LENGTH {
            let len = bytes.len();
            bytes.zeroize();
            return Err(CryptoError::InvalidEncoding(format!(
                "pickle key must be {PICKLE_KEY_LENGTH} bytes, got {len}"
            )));
        }
        let mut key = [0u8; PICKLE_KEY_LENGTH];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8; PICKLE_KEY_LENGTH] {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let key = PickleKey::from_bytes([7u8; 32]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains('7'));
    }

    #[test]
    fn from_base64_accepts_padded_and_unpadded() {
        let raw = [42u8; 32];
        let padded = base64::engine::general_purpose::STANDARD.encode(raw);
        let unpadded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(raw);

        assert_eq!(PickleKey::from_base64(&padded).unwrap().as_bytes(), &raw);
        assert_eq!(PickleKey::from_base64(&unpadded).unwrap().as_bytes(), &raw);
    }

    #[test]
    fn from_base64_rejects_wrong_length() {
        let short = base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        assert!(matches!(
            PickleKey::from_base64(&short),
            Err(CryptoError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn from_base64_rejects_garbage() {
        assert!(PickleKey::from_base64("not base64 at all!!").is_err());
    }
}
