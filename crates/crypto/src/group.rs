//! Outbound Megolm group sessions.
//!
//! Only creation and key export live here; the device keeps the sessions in
//! memory for the lifetime of the process.

use std::collections::HashMap;

use vodozemac::megolm::{GroupSession, SessionConfig};

use crate::error::CryptoError;

#[derive(Default)]
pub struct OutboundGroupSessions {
    sessions: HashMap<String, GroupSession>,
}

impl std::fmt::Debug for OutboundGroupSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundGroupSessions")
            .field("count", &self.sessions.len())
            .finish()
    }
}

impl OutboundGroupSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh outbound session and return its id.
    pub fn create(&mut self) -> String {
        let session = GroupSession::new(SessionConfig::version_1());
        let session_id = session.session_id();
        self.sessions.insert(session_id.clone(), session);
        session_id
    }

    /// Exportable session key at the current ratchet index, base64.
    pub fn session_key(&self, session_id: &str) -> Result<String, CryptoError> {
        self.sessions
            .get(session_id)
            .map(|session| session.session_key().to_base64())
            .ok_or_else(|| CryptoError::UnknownSession {
                device_key: "outbound group".into(),
                session_id: session_id.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
