//! The local device's long-term identity and its one-time key pool.
//!
//! Wraps a vodozemac [`Account`]. Mutations are applied through
//! [`IdentityAccount::update`], which persists the new state before the call
//! returns and rolls the in-memory account back when that write fails.

use std::collections::BTreeMap;

use serde_json::Value;
use vodozemac::olm::{
    Account, AccountPickle, InboundCreationResult, OlmMessage, Session, SessionConfig,
    SessionCreationError,
};
use vodozemac::Curve25519PublicKey;

use crate::canonical_json::signable_json;
use crate::error::CryptoError;
use crate::pickle_key::PickleKey;
use crate::storage::AccountState;

pub struct IdentityAccount {
    account: Account,
    max_one_time_keys: usize,
}

impl std::fmt::Debug for IdentityAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityAccount")
            .field("curve25519_key", &self.curve25519_key())
            .field("max_one_time_keys", &self.max_one_time_keys)
            .finish_non_exhaustive()
    }
}

/// Clamp a configured cap to what the Olm account can actually hold.
fn effective_cap(account: &Account, configured: Option<usize>) -> usize {
    let library_max = account.max_number_of_one_time_keys();
    configured.map_or(library_max, |cap| cap.min(library_max))
}

impl IdentityAccount {
    /// Generate a fresh identity with an empty one-time key pool.
    pub fn new(max_one_time_keys: Option<usize>) -> Self {
        let account = Account::new();
        let max_one_time_keys = effective_cap(&account, max_one_time_keys);
        Self {
            account,
            max_one_time_keys,
        }
    }

    /// Restore an identity from its persisted, encrypted pickle.
    pub fn from_state(
        state: &AccountState,
        pickle_key: &PickleKey,
        max_one_time_keys: Option<usize>,
    ) -> Result<Self, CryptoError> {
        let pickle = AccountPickle::from_encrypted(&state.pickle, pickle_key.as_bytes())?;
        let account = Account::from_pickle(pickle);
        let max_one_time_keys = effective_cap(&account, max_one_time_keys);
        Ok(Self {
            account,
            max_one_time_keys,
        })
    }

    pub fn to_state(&self, pickle_key: &PickleKey) -> AccountState {
        AccountState {
            pickle: self.account.pickle().encrypt(pickle_key.as_bytes()),
        }
    }

    /// Public Curve25519 identity key, unpadded base64.
    pub fn curve25519_key(&self) -> String {
        self.account.curve25519_key().to_base64()
    }

    /// Public Ed25519 signing key, unpadded base64.
    pub fn ed25519_key(&self) -> String {
        self.account.ed25519_key().to_base64()
    }

    /// Unpublished one-time keys, key id to public key (both base64).
    pub fn one_time_keys(&self) -> BTreeMap<String, String> {
        self.account
            .one_time_keys()
            .into_iter()
            .map(|(key_id, key)| (key_id.to_base64(), key.to_base64()))
            .collect()
    }

    pub fn max_number_of_one_time_keys(&self) -> usize {
        self.max_one_time_keys
    }

    /// Add `count` unpublished one-time keys and return the published keys
    /// dropped to make room for them, oldest first.
    ///
    /// Fails with [`CryptoError::CapacityExceeded`] without touching the pool
    /// when the unpublished set would grow past the cap. The account stores a
    /// bounded number of keys in total; once full, each new key evicts the
    /// oldest published one, and a peer holding an evicted key can no longer
    /// open a session with it.
    pub fn generate_one_time_keys(&mut self, count: usize) -> Result<Vec<String>, CryptoError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let unpublished = self.account.one_time_keys().len();
        if unpublished.saturating_add(count) > self.max_one_time_keys {
            return Err(CryptoError::CapacityExceeded {
                unpublished,
                requested: count,
                max: self.max_one_time_keys,
            });
        }
        let generated = self.account.generate_one_time_keys(count);
        Ok(generated.removed.iter().map(Curve25519PublicKey::to_base64).collect())
    }

    pub fn mark_keys_as_published(&mut self) {
        self.account.mark_keys_as_published();
    }

    /// Ed25519 signature over `message`, unpadded base64.
    pub fn sign(&self, message: &[u8]) -> String {
        self.account.sign(message).to_base64()
    }

    /// Sign the canonical form of `value`, ignoring its top-level
    /// `signatures` and `unsigned` members.
    pub fn sign_json(&self, value: &Value) -> Result<String, CryptoError> {
        let canonical = signable_json(value)?;
        Ok(self.sign(canonical.as_bytes()))
    }

    pub(crate) fn create_outbound_session(
        &self,
        identity_key: Curve25519PublicKey,
        one_time_key: Curve25519PublicKey,
    ) -> Session {
        self.account
            .create_outbound_session(SessionConfig::version_1(), identity_key, one_time_key)
    }

    /// Consume the one-time key named by a pre-key message and build the
    /// matching inbound session.
    pub(crate) fn create_inbound_session(
        &mut self,
        identity_key: Curve25519PublicKey,
        message: &OlmMessage,
    ) -> Result<InboundCreationResult, CryptoError> {
        let OlmMessage::PreKey(pre_key) = message else {
            return Err(CryptoError::InvalidPreKeyMessage(
                "inbound sessions can only be created from pre-key messages".into(),
            ));
        };
        self.account
            .create_inbound_session(identity_key, pre_key)
            .map_err(|e| match e {
                SessionCreationError::Decryption(inner) => {
                    CryptoError::DecryptionFailed(inner.to_string())
                }
                other => CryptoError::InvalidPreKeyMessage(other.to_string()),
            })
    }

    /// Apply `step` and persist the resulting state through `persist`.
    ///
    /// If either fails the account is restored to the state it had before
    /// the call, so memory never runs ahead of the store.
    pub(crate) fn update<T>(
        &mut self,
        pickle_key: &PickleKey,
        step: impl FnOnce(&mut Self) -> Result<T, CryptoError>,
        persist: impl FnOnce(&AccountState, &T) -> Result<(), CryptoError>,
    ) -> Result<T, CryptoError> {
        let snapshot = self.account.pickle();
        let result = step(self).and_then(|value| {
            persist(&self.to_state(pickle_key), &value)?;
            Ok(value)
        });
        if result.is_err() {
            self.account = Account::from_pickle(snapshot);
        }
        result
    }
}
