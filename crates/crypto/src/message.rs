//! Olm message framing: the `(message_type, ciphertext)` pair exchanged with
//! peers, plus classification of ratchet decryption failures.

use base64::Engine;
use serde::{Deserialize, Serialize};
use vodozemac::olm::{DecryptionError, OlmMessage, Session};

use olmdev_shared::constants::{MESSAGE_TYPE_NORMAL, MESSAGE_TYPE_PRE_KEY};

use crate::encoding::BASE64;
use crate::error::CryptoError;

/// Kind of Olm message, carried alongside the ciphertext on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Session-establishing message. Repeated until the sender has received
    /// a reply on the session.
    PreKey,
    /// Ratchet message on an established session.
    Normal,
}

impl MessageType {
    pub fn as_wire(self) -> usize {
        match self {
            MessageType::PreKey => MESSAGE_TYPE_PRE_KEY,
            MessageType::Normal => MESSAGE_TYPE_NORMAL,
        }
    }

    /// Returns `None` for numbers Olm does not define.
    pub fn from_wire(value: usize) -> Option<Self> {
        match value {
            MESSAGE_TYPE_PRE_KEY => Some(MessageType::PreKey),
            MESSAGE_TYPE_NORMAL => Some(MessageType::Normal),
            _ => None,
        }
    }
}

/// Output of an encryption: what the caller ships to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    pub message_type: MessageType,
    /// Unpadded base64 Olm ciphertext.
    pub ciphertext: String,
}

impl From<OlmMessage> for EncryptedMessage {
    fn from(message: OlmMessage) -> Self {
        let message_type = match message {
            OlmMessage::PreKey(_) => MessageType::PreKey,
            OlmMessage::Normal(_) => MessageType::Normal,
        };
        let (_, body) = message.to_parts();
        Self {
            message_type,
            ciphertext: BASE64.encode(body),
        }
    }
}

/// Decode a wire message. Malformed input is reported the same way as a
/// failed decryption.
pub fn parse_message(message_type: MessageType, ciphertext: &str) -> Result<OlmMessage, CryptoError> {
    let malformed = |reason: String| match message_type {
        MessageType::PreKey => CryptoError::InvalidPreKeyMessage(reason),
        MessageType::Normal => CryptoError::DecryptionFailed(reason),
    };
    let body = BASE64
        .decode(ciphertext)
        .map_err(|e| malformed(format!("ciphertext is not base64: {e}")))?;
    OlmMessage::from_parts(message_type.as_wire(), &body).map_err(|e| malformed(e.to_string()))
}

/// True only for a pre-key message that was produced by the peer side of
/// `session`. Never mutates the session.
pub fn matches(session: &Session, message: &OlmMessage) -> bool {
    match message {
        OlmMessage::PreKey(pre_key) => pre_key.session_id() == session.session_id(),
        OlmMessage::Normal(_) => false,
    }
}

/// Classify a ratchet decryption error.
///
/// A missing message key means the key was already used (replay) or was
/// never derived, and a too-large gap means the message lies beyond the skip
/// window; both surface as `ReplayOrOutOfOrder`. Everything else is an
/// authentication or framing failure.
pub fn classify_decrypt_error(err: DecryptionError) -> CryptoError {
    match &err {
        DecryptionError::MissingMessageKey(_) | DecryptionError::TooBigMessageGap(_, _) => {
            CryptoError::ReplayOrOutOfOrder(err.to_string())
        }
        _ => CryptoError::DecryptionFailed(err.to_string()),
    }
}
