//! Error types for the olmdev-crypto crate.

use thiserror::Error;

/// Errors that can occur during device cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Generating the requested one-time keys would overflow the pool.
    #[error("one-time key pool full: {unpublished} unpublished, {requested} requested, max {max}")]
    CapacityExceeded {
        unpublished: usize,
        requested: usize,
        max: usize,
    },

    /// Remote key material supplied for a key agreement is malformed.
    #[error("key agreement failed: {0}")]
    KeyAgreement(String),

    /// A pre-key message references an unknown or already consumed one-time
    /// key, or the message is not a pre-key message at all.
    #[error("invalid pre-key message: {0}")]
    InvalidPreKeyMessage(String),

    /// The session id is not registered to the given device.
    #[error("unknown session {session_id} for device {device_key}")]
    UnknownSession {
        device_key: String,
        session_id: String,
    },

    /// No session at all exists for the given device.
    #[error("no session for device {device_key}")]
    NoSession { device_key: String },

    /// Decryption failed (authentication failure, malformed ciphertext).
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// The message key was already consumed or is outside the skip window.
    #[error("replayed or out-of-order message: {0}")]
    ReplayOrOutOfOrder(String),

    /// A key or signature is not valid base64 or has the wrong shape.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// The signature does not verify against the key and message.
    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),

    /// The value cannot be represented as canonical JSON.
    #[error("invalid canonical json: {0}")]
    InvalidCanonicalJson(String),

    /// Key store read or write failure.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Serialization, deserialization or unpickling error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Invalid device configuration.
    #[error("config error: {0}")]
    ConfigError(String),
}

impl From<rusqlite::Error> for CryptoError {
    fn from(err: rusqlite::Error) -> Self {
        CryptoError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(err: serde_json::Error) -> Self {
        CryptoError::SerializationError(err.to_string())
    }
}

impl From<vodozemac::PickleError> for CryptoError {
    fn from(err: vodozemac::PickleError) -> Self {
        CryptoError::SerializationError(err.to_string())
    }
}

impl From<CryptoError> for olmdev_shared::error::OlmdevError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::ConfigError(detail) => olmdev_shared::error::OlmdevError::Config(detail),
            other => olmdev_shared::error::OlmdevError::Crypto(other.to_string()),
        }
    }
}
