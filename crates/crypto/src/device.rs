//! The device: identity account, pairwise sessions and outbound group
//! sessions behind one thread-safe handle.
//!
//! Locks are taken in the order account, session entry, session index. The
//! index lock is only held for bookkeeping and never while waiting on a
//! session. Every mutation is written through the key store before it is
//! reported as successful; a failed write leaves memory as it was.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use vodozemac::olm::OlmMessage;
use vodozemac::Curve25519PublicKey;

use crate::config::DeviceConfig;
use crate::error::CryptoError;
use crate::group::OutboundGroupSessions;
use crate::identity::IdentityAccount;
use crate::message::{self, classify_decrypt_error, parse_message, EncryptedMessage, MessageType};
use crate::pickle_key::PickleKey;
use crate::registry::SessionRegistry;
use crate::session::{parse_curve25519_key, SessionEntry, SessionInfo};
use crate::storage::KeyStore;

/// Result of establishing a session from an incoming pre-key message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSession {
    pub payload: Vec<u8>,
    pub session_id: String,
}

/// Result of [`OlmDevice::decrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub payload: Vec<u8>,
    /// Session that decrypted the message.
    pub session_id: String,
    /// Whether the message established a new inbound session.
    pub created_session: bool,
}

type SharedEntry = Arc<Mutex<SessionEntry>>;

#[derive(Debug, Default)]
struct SessionIndex {
    registry: SessionRegistry,
    entries: HashMap<String, SharedEntry>,
    loaded_devices: HashSet<String>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, CryptoError> {
    mutex
        .lock()
        .map_err(|_| CryptoError::StorageError(format!("{what} lock poisoned")))
}

/// Canonical form of a peer identity key, so padded and unpadded spellings
/// address the same sessions. Unparseable keys are used verbatim.
fn device_key_of(identity_key: &str) -> String {
    parse_curve25519_key(identity_key, "identity key")
        .map(|key| key.to_base64())
        .unwrap_or_else(|_| identity_key.to_string())
}

pub struct OlmDevice<S: KeyStore> {
    store: S,
    pickle_key: PickleKey,
    curve25519_key: String,
    ed25519_key: String,
    account: Mutex<IdentityAccount>,
    sessions: Mutex<SessionIndex>,
    group_sessions: Mutex<OutboundGroupSessions>,
}

impl<S: KeyStore> std::fmt::Debug for OlmDevice<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OlmDevice")
            .field("curve25519_key", &self.curve25519_key)
            .field("ed25519_key", &self.ed25519_key)
            .finish_non_exhaustive()
    }
}

impl<S: KeyStore> OlmDevice<S> {
    /// Load the device identity from `store`, creating and persisting a new
    /// one on first use.
    pub fn open(store: S, pickle_key: PickleKey, config: &DeviceConfig) -> Result<Self, CryptoError> {
        let account = match store.load_account()? {
            Some(state) => {
                let account =
                    IdentityAccount::from_state(&state, &pickle_key, config.max_one_time_keys)?;
                tracing::info!(curve25519 = %account.curve25519_key(), "loaded device identity");
                account
            }
            None => {
                let account = IdentityAccount::new(config.max_one_time_keys);
                store.save_account(&account.to_state(&pickle_key))?;
                tracing::info!(curve25519 = %account.curve25519_key(), "created device identity");
                account
            }
        };

        Ok(Self {
            store,
            pickle_key,
            curve25519_key: account.curve25519_key(),
            ed25519_key: account.ed25519_key(),
            account: Mutex::new(account),
            sessions: Mutex::new(SessionIndex::default()),
            group_sessions: Mutex::new(OutboundGroupSessions::new()),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    // ---- identity account ----

    pub fn curve25519_key(&self) -> &str {
        &self.curve25519_key
    }

    pub fn ed25519_key(&self) -> &str {
        &self.ed25519_key
    }

    pub fn one_time_keys(&self) -> Result<BTreeMap<String, String>, CryptoError> {
        Ok(lock(&self.account, "account")?.one_time_keys())
    }

    pub fn max_number_of_one_time_keys(&self) -> Result<usize, CryptoError> {
        Ok(lock(&self.account, "account")?.max_number_of_one_time_keys())
    }

    /// Generate `count` one-time keys. Returns the previously published keys
    /// the account evicted to make room, which peers can no longer claim.
    pub fn generate_one_time_keys(&self, count: usize) -> Result<Vec<String>, CryptoError> {
        let mut account = lock(&self.account, "account")?;
        let evicted = account.update(
            &self.pickle_key,
            |acct| acct.generate_one_time_keys(count),
            |state, _| self.store.save_account(state),
        )?;
        if !evicted.is_empty() {
            tracing::warn!(
                evicted = evicted.len(),
                "one-time key store full, evicted published keys"
            );
        }
        tracing::debug!(count, "generated one-time keys");
        Ok(evicted)
    }

    pub fn mark_keys_as_published(&self) -> Result<(), CryptoError> {
        let mut account = lock(&self.account, "account")?;
        account.update(
            &self.pickle_key,
            |acct| {
                acct.mark_keys_as_published();
                Ok(())
            },
            |state, _| self.store.save_account(state),
        )?;
        tracing::debug!("marked one-time keys as published");
        Ok(())
    }

    pub fn sign(&self, message: &[u8]) -> Result<String, CryptoError> {
        Ok(lock(&self.account, "account")?.sign(message))
    }

    pub fn sign_json(&self, value: &Value) -> Result<String, CryptoError> {
        lock(&self.account, "account")?.sign_json(value)
    }

    // ---- session registry ----

    /// Session ids shared with the device owning `their_identity_key`, most
    /// recently used first.
    pub fn session_ids_for_device(&self, their_identity_key: &str) -> Result<Vec<String>, CryptoError> {
        let device_key = device_key_of(their_identity_key);
        self.ensure_loaded(&device_key)?;
        Ok(lock(&self.sessions, "session index")?
            .registry
            .session_ids_for_device(&device_key))
    }

    /// The preferred session for sending to `their_identity_key`.
    pub fn session_id_for_device(&self, their_identity_key: &str) -> Result<Option<String>, CryptoError> {
        let device_key = device_key_of(their_identity_key);
        self.ensure_loaded(&device_key)?;
        Ok(lock(&self.sessions, "session index")?
            .registry
            .session_id_for_device(&device_key))
    }

    pub fn session_info_for_device(
        &self,
        their_identity_key: &str,
    ) -> Result<Vec<SessionInfo>, CryptoError> {
        let device_key = device_key_of(their_identity_key);
        self.ensure_loaded(&device_key)?;
        self.candidates(&device_key)?
            .into_iter()
            .map(|(_, entry)| {
                let info = lock(&entry, "session")?.info();
                Ok(info)
            })
            .collect()
    }

    /// Mark a session as the most recently used one for its device and
    /// persist the new stamp. Ids the device does not know are ignored.
    pub fn record_use(&self, session_id: &str) -> Result<(), CryptoError> {
        let Some(entry) = lock(&self.sessions, "session index")?
            .entries
            .get(session_id)
            .cloned()
        else {
            tracing::debug!(session_id, "record_use for unknown session ignored");
            return Ok(());
        };

        let mut guard = lock(&entry, "session")?;
        let stamp = self.next_stamp()?;
        let device_key = guard.device_key().to_string();
        guard.advance(
            &self.pickle_key,
            stamp,
            |_| Ok(()),
            |state| self.store.save_session(&device_key, session_id, state),
        )?;
        lock(&self.sessions, "session index")?
            .registry
            .record_use(session_id, stamp);
        Ok(())
    }

    // ---- pairwise sessions ----

    /// Start a session with a peer from its identity key and one of its
    /// published one-time keys.
    pub fn create_outbound_session(
        &self,
        their_identity_key: &str,
        their_one_time_key: &str,
    ) -> Result<String, CryptoError> {
        let identity_key = parse_curve25519_key(their_identity_key, "identity key")?;
        let one_time_key = parse_curve25519_key(their_one_time_key, "one-time key")?;
        let device_key = identity_key.to_base64();
        self.ensure_loaded(&device_key)?;

        let session = lock(&self.account, "account")?.create_outbound_session(identity_key, one_time_key);
        let entry = SessionEntry::new(&device_key, session, self.next_stamp()?);
        let session_id = entry.session_id().to_string();
        self.store
            .save_session(&device_key, &session_id, &entry.to_state(&self.pickle_key))?;
        self.insert_entry(entry)?;

        tracing::info!(device = %device_key, session_id = %session_id, "created outbound session");
        Ok(session_id)
    }

    /// Establish a session from a pre-key message, consuming the one-time
    /// key it references.
    pub fn create_inbound_session(
        &self,
        their_identity_key: &str,
        message_type: MessageType,
        ciphertext: &str,
    ) -> Result<InboundSession, CryptoError> {
        if message_type != MessageType::PreKey {
            return Err(CryptoError::InvalidPreKeyMessage(
                "inbound sessions can only be created from pre-key messages".into(),
            ));
        }
        let identity_key = parse_curve25519_key(their_identity_key, "identity key")?;
        let message = parse_message(message_type, ciphertext)?;
        let device_key = identity_key.to_base64();
        self.ensure_loaded(&device_key)?;

        let mut account = lock(&self.account, "account")?;
        self.create_inbound_locked(&mut account, identity_key, &message)
    }

    pub fn encrypt_message(
        &self,
        their_identity_key: &str,
        session_id: &str,
        payload: &[u8],
    ) -> Result<EncryptedMessage, CryptoError> {
        let device_key = device_key_of(their_identity_key);
        self.ensure_loaded(&device_key)?;
        let entry = self.entry(&device_key, session_id)?;

        let mut guard = lock(&entry, "session")?;
        let stamp = self.next_stamp()?;
        let message = guard.advance(
            &self.pickle_key,
            stamp,
            |session| Ok(session.encrypt(payload)),
            |state| self.store.save_session(&device_key, session_id, state),
        )?;
        lock(&self.sessions, "session index")?
            .registry
            .record_use(session_id, stamp);

        let encrypted = EncryptedMessage::from(message);
        tracing::debug!(
            session_id,
            message_type = ?encrypted.message_type,
            payload_len = payload.len(),
            "encrypted message"
        );
        Ok(encrypted)
    }

    pub fn decrypt_message(
        &self,
        their_identity_key: &str,
        session_id: &str,
        message_type: MessageType,
        ciphertext: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        let device_key = device_key_of(their_identity_key);
        let message = parse_message(message_type, ciphertext).map_err(|e| match e {
            CryptoError::InvalidPreKeyMessage(reason) => CryptoError::DecryptionFailed(reason),
            other => other,
        })?;
        self.ensure_loaded(&device_key)?;
        let entry = self.entry(&device_key, session_id)?;

        // A pre-key message for another session cannot advance this one.
        if matches!(message, OlmMessage::PreKey(_))
            && !message::matches(lock(&entry, "session")?.session(), &message)
        {
            return Err(CryptoError::ReplayOrOutOfOrder(format!(
                "pre-key message does not belong to session {session_id}"
            )));
        }
        self.decrypt_with(&entry, &message)
    }

    /// Whether a pre-key message belongs to the given session. Normal and
    /// unparseable messages never match. Does not touch session state.
    pub fn matches_session(
        &self,
        their_identity_key: &str,
        session_id: &str,
        message_type: MessageType,
        ciphertext: &str,
    ) -> Result<bool, CryptoError> {
        let device_key = device_key_of(their_identity_key);
        self.ensure_loaded(&device_key)?;
        let entry = self.entry(&device_key, session_id)?;

        let Ok(message) = parse_message(message_type, ciphertext) else {
            return Ok(false);
        };
        let guard = lock(&entry, "session")?;
        Ok(message::matches(guard.session(), &message))
    }

    /// Decrypt a message from a peer, picking the session automatically.
    ///
    /// A pre-key message is decrypted by the first session it matches, or
    /// establishes a new inbound session when none does. A normal message is
    /// tried against every session for the peer, most recently used first,
    /// and the last failure is reported if none succeeds.
    pub fn decrypt(
        &self,
        their_identity_key: &str,
        message_type: MessageType,
        ciphertext: &str,
    ) -> Result<DecryptedMessage, CryptoError> {
        let device_key = device_key_of(their_identity_key);
        let message = parse_message(message_type, ciphertext)?;
        self.ensure_loaded(&device_key)?;

        match message_type {
            MessageType::PreKey => {
                // Held across match and create so two copies of the same
                // pre-key message cannot both establish a session.
                let mut account = lock(&self.account, "account")?;

                for (session_id, entry) in self.candidates(&device_key)? {
                    let matched = message::matches(lock(&entry, "session")?.session(), &message);
                    if matched {
                        let payload = self.decrypt_with(&entry, &message)?;
                        return Ok(DecryptedMessage {
                            payload,
                            session_id,
                            created_session: false,
                        });
                    }
                }

                let identity_key = parse_curve25519_key(their_identity_key, "identity key")?;
                let inbound = self.create_inbound_locked(&mut account, identity_key, &message)?;
                Ok(DecryptedMessage {
                    payload: inbound.payload,
                    session_id: inbound.session_id,
                    created_session: true,
                })
            }
            MessageType::Normal => {
                let candidates = self.candidates(&device_key)?;
                if candidates.is_empty() {
                    return Err(CryptoError::NoSession { device_key });
                }

                let mut last_error = None;
                for (session_id, entry) in candidates {
                    match self.decrypt_with(&entry, &message) {
                        Ok(payload) => {
                            return Ok(DecryptedMessage {
                                payload,
                                session_id,
                                created_session: false,
                            })
                        }
                        Err(e @ CryptoError::StorageError(_)) => return Err(e),
                        Err(e) => {
                            tracing::debug!(
                                device = %device_key,
                                session_id = %session_id,
                                error = %e,
                                "session could not decrypt message, trying next"
                            );
                            last_error = Some(e);
                        }
                    }
                }

                let error = last_error.unwrap_or(CryptoError::NoSession { device_key });
                tracing::warn!(error = %error, "no session could decrypt message");
                Err(error)
            }
        }
    }

    // ---- group sessions ----

    pub fn create_outbound_group_session(&self) -> Result<String, CryptoError> {
        let session_id = lock(&self.group_sessions, "group sessions")?.create();
        tracing::info!(session_id = %session_id, "created outbound group session");
        Ok(session_id)
    }

    pub fn outbound_group_session_key(&self, session_id: &str) -> Result<String, CryptoError> {
        lock(&self.group_sessions, "group sessions")?.session_key(session_id)
    }

    // ---- internals ----

    fn next_stamp(&self) -> Result<u64, CryptoError> {
        Ok(lock(&self.sessions, "session index")?.registry.next_stamp())
    }

    /// Unpickle every stored session for `device_key` the first time the
    /// device is touched.
    fn ensure_loaded(&self, device_key: &str) -> Result<(), CryptoError> {
        if lock(&self.sessions, "session index")?
            .loaded_devices
            .contains(device_key)
        {
            return Ok(());
        }

        let mut loaded = Vec::new();
        for session_id in self.store.all_session_ids(device_key)? {
            if let Some(state) = self.store.load_session(device_key, &session_id)? {
                loaded.push(SessionEntry::from_state(device_key, &state, &self.pickle_key)?);
            }
        }

        let mut index = lock(&self.sessions, "session index")?;
        if !index.loaded_devices.insert(device_key.to_string()) {
            return Ok(());
        }
        let count = loaded.len();
        for entry in loaded {
            if index.entries.contains_key(entry.session_id()) {
                continue;
            }
            let session_id = entry.session_id().to_string();
            index
                .registry
                .insert(device_key, &session_id, entry.last_used());
            index.entries.insert(session_id, Arc::new(Mutex::new(entry)));
        }
        tracing::debug!(device = %device_key, count, "loaded sessions for device");
        Ok(())
    }

    fn insert_entry(&self, entry: SessionEntry) -> Result<(), CryptoError> {
        let mut index = lock(&self.sessions, "session index")?;
        let session_id = entry.session_id().to_string();
        index
            .registry
            .insert(entry.device_key(), &session_id, entry.last_used());
        index.entries.insert(session_id, Arc::new(Mutex::new(entry)));
        Ok(())
    }

    fn entry(&self, device_key: &str, session_id: &str) -> Result<SharedEntry, CryptoError> {
        let index = lock(&self.sessions, "session index")?;
        index
            .entries
            .get(session_id)
            .filter(|_| index.registry.contains(device_key, session_id))
            .cloned()
            .ok_or_else(|| CryptoError::UnknownSession {
                device_key: device_key.to_string(),
                session_id: session_id.to_string(),
            })
    }

    /// Sessions for `device_key` in preference order.
    fn candidates(&self, device_key: &str) -> Result<Vec<(String, SharedEntry)>, CryptoError> {
        let index = lock(&self.sessions, "session index")?;
        Ok(index
            .registry
            .session_ids_for_device(device_key)
            .into_iter()
            .filter_map(|id| index.entries.get(&id).cloned().map(|entry| (id, entry)))
            .collect())
    }

    fn decrypt_with(&self, entry: &SharedEntry, message: &OlmMessage) -> Result<Vec<u8>, CryptoError> {
        let mut guard = lock(entry, "session")?;
        let stamp = self.next_stamp()?;
        let device_key = guard.device_key().to_string();
        let session_id = guard.session_id().to_string();

        let payload = guard.advance(
            &self.pickle_key,
            stamp,
            |session| session.decrypt(message).map_err(classify_decrypt_error),
            |state| self.store.save_session(&device_key, &session_id, state),
        )?;
        lock(&self.sessions, "session index")?
            .registry
            .record_use(&session_id, stamp);

        tracing::debug!(session_id = %session_id, payload_len = payload.len(), "decrypted message");
        Ok(payload)
    }

    /// Inbound session creation with the account lock already held by the
    /// caller. The consumed one-time key and the new session are persisted
    /// together.
    fn create_inbound_locked(
        &self,
        account: &mut IdentityAccount,
        identity_key: Curve25519PublicKey,
        message: &OlmMessage,
    ) -> Result<InboundSession, CryptoError> {
        let device_key = identity_key.to_base64();
        let stamp = self.next_stamp()?;

        let (entry, payload) = account.update(
            &self.pickle_key,
            |acct| {
                let created = acct.create_inbound_session(identity_key, message)?;
                Ok((
                    SessionEntry::new(&device_key, created.session, stamp),
                    created.plaintext,
                ))
            },
            |account_state, (entry, _)| {
                self.store.save_account_and_session(
                    account_state,
                    &device_key,
                    entry.session_id(),
                    &entry.to_state(&self.pickle_key),
                )
            },
        )?;

        let session_id = entry.session_id().to_string();
        self.insert_entry(entry)?;
        tracing::info!(device = %device_key, session_id = %session_id, "created inbound session");

        Ok(InboundSession {
            payload,
            session_id,
        })
    }
}
