//! A single pairwise Olm session and its persisted form.

use base64::Engine;
use vodozemac::olm::{Session, SessionPickle};
use vodozemac::Curve25519PublicKey;

use crate::encoding::BASE64;
use crate::error::CryptoError;
use crate::pickle_key::PickleKey;
use crate::storage::SessionState;

/// Parse a peer's base64 Curve25519 key (padded or unpadded) for a key
/// agreement.
pub fn parse_curve25519_key(key: &str, what: &str) -> Result<Curve25519PublicKey, CryptoError> {
    let bytes = BASE64
        .decode(key)
        .map_err(|e| CryptoError::KeyAgreement(format!("invalid base64 {what}: {e}")))?;
    Curve25519PublicKey::from_slice(&bytes)
        .map_err(|e| CryptoError::KeyAgreement(format!("invalid {what}: {e}")))
}

/// Information about a session exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub has_received_message: bool,
}

pub struct SessionEntry {
    device_key: String,
    session_id: String,
    session: Session,
    last_used: u64,
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("device_key", &self.device_key)
            .field("session_id", &self.session_id)
            .field("last_used", &self.last_used)
            .finish_non_exhaustive()
    }
}

impl SessionEntry {
    pub fn new(device_key: &str, session: Session, last_used: u64) -> Self {
        Self {
            device_key: device_key.to_string(),
            session_id: session.session_id(),
            session,
            last_used,
        }
    }

    pub fn from_state(
        device_key: &str,
        state: &SessionState,
        pickle_key: &PickleKey,
    ) -> Result<Self, CryptoError> {
        let pickle = SessionPickle::from_encrypted(&state.pickle, pickle_key.as_bytes())?;
        Ok(Self::new(
            device_key,
            Session::from_pickle(pickle),
            state.last_used,
        ))
    }

    pub fn to_state(&self, pickle_key: &PickleKey) -> SessionState {
        SessionState {
            pickle: self.session.pickle().encrypt(pickle_key.as_bytes()),
            has_received_message: self.session.has_received_message(),
            last_used: self.last_used,
        }
    }

    pub fn device_key(&self) -> &str {
        &self.device_key
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn last_used(&self) -> u64 {
        self.last_used
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            has_received_message: self.session.has_received_message(),
        }
    }

    /// Run one ratchet step, stamp the session as used at `stamp` and
    /// persist it.
    ///
    /// When the step or the write fails the session and its stamp are put
    /// back exactly as they were.
    pub(crate) fn advance<T>(
        &mut self,
        pickle_key: &PickleKey,
        stamp: u64,
        step: impl FnOnce(&mut Session) -> Result<T, CryptoError>,
        persist: impl FnOnce(&SessionState) -> Result<(), CryptoError>,
    ) -> Result<T, CryptoError> {
        let snapshot = self.session.pickle();
        let previous_stamp = self.last_used;

        let result = step(&mut self.session).and_then(|value| {
            self.last_used = stamp;
            persist(&self.to_state(pickle_key))?;
            Ok(value)
        });

        if result.is_err() {
            self.session = Session::from_pickle(snapshot);
            self.last_used = previous_stamp;
        }
        result
    }
}
