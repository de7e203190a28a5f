//! Key store boundary: durable storage for the pickled account and sessions.
//!
//! The device treats every call as durable and atomic on its own. Pickles are
//! already encrypted with the pickle key when they reach the store.

pub mod memory;
pub mod migrations;
pub mod sqlite;

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

pub use memory::MemoryKeyStore;
pub use sqlite::SqliteKeyStore;

/// Persisted form of the identity account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    /// Encrypted vodozemac account pickle.
    pub pickle: String,
}

/// Persisted form of one pairwise session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Encrypted vodozemac session pickle.
    pub pickle: String,
    /// Whether the session has decrypted at least one message.
    pub has_received_message: bool,
    /// Hybrid monotonic stamp of the last successful use (milliseconds).
    pub last_used: u64,
}

/// Durable storage consumed by [`crate::device::OlmDevice`].
pub trait KeyStore: Send + Sync {
    fn load_account(&self) -> Result<Option<AccountState>, CryptoError>;

    fn save_account(&self, state: &AccountState) -> Result<(), CryptoError>;

    fn load_session(
        &self,
        device_key: &str,
        session_id: &str,
    ) -> Result<Option<SessionState>, CryptoError>;

    fn save_session(
        &self,
        device_key: &str,
        session_id: &str,
        state: &SessionState,
    ) -> Result<(), CryptoError>;

    /// All session ids stored for a device. Order is unspecified.
    fn all_session_ids(&self, device_key: &str) -> Result<Vec<String>, CryptoError>;

    /// Persist a freshly created inbound session together with the account
    /// whose one-time key it consumed.
    ///
    /// Stores that support transactions should override this so both writes
    /// land or neither does.
    fn save_account_and_session(
        &self,
        account: &AccountState,
        device_key: &str,
        session_id: &str,
        session: &SessionState,
    ) -> Result<(), CryptoError> {
        self.save_session(device_key, session_id, session)?;
        self.save_account(account)
    }
}

/// Current wall-clock time in whole seconds since the Unix epoch.
pub(crate) fn now_secs() -> Result<i64, CryptoError> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|_| CryptoError::StorageError("system clock before epoch".into()))?
        .as_secs() as i64)
}
