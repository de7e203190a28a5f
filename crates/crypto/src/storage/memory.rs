//! In-memory [`KeyStore`] for tests and ephemeral devices.
//!
//! Writes can be made to fail on demand so callers can exercise their
//! rollback paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::CryptoError;
use crate::storage::{AccountState, KeyStore, SessionState};

#[derive(Debug, Default)]
struct Inner {
    account: Option<AccountState>,
    sessions: HashMap<(String, String), SessionState>,
}

#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every write returns `StorageError` and leaves the store untouched.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of sessions stored for `device_key`.
    pub fn session_count(&self, device_key: &str) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.sessions.keys().filter(|(d, _)| d == device_key).count())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, CryptoError> {
        self.inner
            .lock()
            .map_err(|_| CryptoError::StorageError("memory store lock poisoned".into()))
    }

    fn check_writable(&self) -> Result<(), CryptoError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CryptoError::StorageError("injected write failure".into()));
        }
        Ok(())
    }
}

impl KeyStore for MemoryKeyStore {
    fn load_account(&self) -> Result<Option<AccountState>, CryptoError> {
        Ok(self.lock()?.account.clone())
    }

    fn save_account(&self, state: &AccountState) -> Result<(), CryptoError> {
        self.check_writable()?;
        self.lock()?.account = Some(state.clone());
        Ok(())
    }

    fn load_session(
        &self,
        device_key: &str,
        session_id: &str,
    ) -> Result<Option<SessionState>, CryptoError> {
        Ok(self
            .lock()?
            .sessions
            .get(&(device_key.to_string(), session_id.to_string()))
            .cloned())
    }

    fn save_session(
        &self,
        device_key: &str,
        session_id: &str,
        state: &SessionState,
    ) -> Result<(), CryptoError> {
        self.check_writable()?;
        self.lock()?.sessions.insert(
            (device_key.to_string(), session_id.to_string()),
            state.clone(),
        );
        Ok(())
    }

    fn all_session_ids(&self, device_key: &str) -> Result<Vec<String>, CryptoError> {
        Ok(self
            .lock()?
            .sessions
            .keys()
            .filter(|(d, _)| d == device_key)
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn save_account_and_session(
        &self,
        account: &AccountState,
        device_key: &str,
        session_id: &str,
        session: &SessionState,
    ) -> Result<(), CryptoError> {
        self.check_writable()?;
        let mut inner = self.lock()?;
        inner.sessions.insert(
            (device_key.to_string(), session_id.to_string()),
            session.clone(),
        );
        inner.account = Some(account.clone());
        Ok(())
    }
}
