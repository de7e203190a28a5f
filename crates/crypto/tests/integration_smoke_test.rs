//! Full roundtrip integration smoke test for olmdev-crypto.
//!
//! Drives two devices backed by on-disk SQLite key stores through key
//! publication, session establishment, bidirectional messaging, a restart
//! and signature checks.

use std::path::Path;

use olmdev_crypto::config::DeviceConfig;
use olmdev_crypto::error::CryptoError;
use olmdev_crypto::signature;
use olmdev_crypto::storage::SqliteKeyStore;
use olmdev_crypto::{MessageType, OlmDevice, PickleKey};

fn open_device(path: &Path, key: u8) -> OlmDevice<SqliteKeyStore> {
    let store = SqliteKeyStore::open(path).unwrap();
    OlmDevice::open(store, PickleKey::from_bytes([key; 32]), &DeviceConfig::default()).unwrap()
}

#[test]
fn full_roundtrip_alice_bob() {
    let dir = tempfile::tempdir().unwrap();
    let alice_path = dir.path().join("alice.db");
    let bob_path = dir.path().join("bob.db");

    let alice = open_device(&alice_path, 1);
    let bob = open_device(&bob_path, 2);

    // -- Bob publishes one-time keys, signed as a JSON object --
    bob.generate_one_time_keys(5).unwrap();
    let published = bob.one_time_keys().unwrap();
    assert_eq!(published.len(), 5);

    let key_upload = serde_json::json!({ "one_time_keys": published });
    let upload_sig = bob.sign_json(&key_upload).unwrap();
    signature::verify_json_signature(bob.ed25519_key(), &key_upload, &upload_sig).unwrap();
    bob.mark_keys_as_published().unwrap();
    assert!(bob.one_time_keys().unwrap().is_empty());

    // -- Alice claims one key and starts a session --
    let otk = published.values().next().unwrap().clone();
    let session_id = alice
        .create_outbound_session(bob.curve25519_key(), &otk)
        .unwrap();
    assert_eq!(
        alice.session_id_for_device(bob.curve25519_key()).unwrap(),
        Some(session_id.clone())
    );

    let c1 = alice
        .encrypt_message(bob.curve25519_key(), &session_id, b"hello")
        .unwrap();
    assert_eq!(c1.message_type, MessageType::PreKey);

    // -- Bob receives the pre-key message --
    let received = bob
        .decrypt(alice.curve25519_key(), c1.message_type, &c1.ciphertext)
        .unwrap();
    assert_eq!(received.payload, b"hello");
    assert!(received.created_session);
    assert_eq!(received.session_id, session_id);

    // -- Duplicate delivery of the pre-key message is rejected --
    let replay = bob.decrypt(alice.curve25519_key(), c1.message_type, &c1.ciphertext);
    assert!(matches!(replay, Err(CryptoError::ReplayOrOutOfOrder(_))));

    // -- Bob replies with a normal message --
    let reply = bob
        .encrypt_message(alice.curve25519_key(), &session_id, b"hi")
        .unwrap();
    assert_eq!(reply.message_type, MessageType::Normal);
    let plaintext = alice
        .decrypt_message(
            bob.curve25519_key(),
            &session_id,
            reply.message_type,
            &reply.ciphertext,
        )
        .unwrap();
    assert_eq!(plaintext, b"hi");

    // -- Alice's next message is a normal message too --
    let c2 = alice
        .encrypt_message(bob.curve25519_key(), &session_id, b"how are you?")
        .unwrap();
    assert_eq!(c2.message_type, MessageType::Normal);

    // -- Restart both devices from disk --
    let alice_key = alice.curve25519_key().to_string();
    let bob_key = bob.curve25519_key().to_string();
    drop(alice);
    drop(bob);
    let alice = open_device(&alice_path, 1);
    let bob = open_device(&bob_path, 2);
    assert_eq!(alice.curve25519_key(), alice_key);
    assert_eq!(bob.curve25519_key(), bob_key);

    let after_restart = bob
        .decrypt(&alice_key, c2.message_type, &c2.ciphertext)
        .unwrap();
    assert_eq!(after_restart.payload, b"how are you?");
    assert_eq!(after_restart.session_id, session_id);
    assert!(!after_restart.created_session);

    let info = bob.session_info_for_device(&alice_key).unwrap();
    assert_eq!(info.len(), 1);
    assert!(info[0].has_received_message);
}

#[test]
fn second_device_session_and_signatures() {
    let dir = tempfile::tempdir().unwrap();
    let alice = open_device(&dir.path().join("alice.db"), 7);
    let bob = open_device(&dir.path().join("bob.db"), 8);

    // Raw byte signatures: valid, mutated message, wrong key.
    let signed = alice.sign(b"device challenge").unwrap();
    assert!(signature::is_valid_signature(alice.ed25519_key(), b"device challenge", &signed));
    assert!(matches!(
        signature::verify_signature(alice.ed25519_key(), b"device challengE", &signed),
        Err(CryptoError::SignatureMismatch(_))
    ));
    assert!(!signature::is_valid_signature(bob.ed25519_key(), b"device challenge", &signed));

    // Two sessions to the same peer; the most recently used one wins.
    bob.generate_one_time_keys(2).unwrap();
    let keys: Vec<String> = bob.one_time_keys().unwrap().into_values().collect();
    bob.mark_keys_as_published().unwrap();

    let first = alice
        .create_outbound_session(bob.curve25519_key(), &keys[0])
        .unwrap();
    let second = alice
        .create_outbound_session(bob.curve25519_key(), &keys[1])
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(
        alice.session_id_for_device(bob.curve25519_key()).unwrap(),
        Some(second.clone())
    );

    let message = alice
        .encrypt_message(bob.curve25519_key(), &first, b"on first")
        .unwrap();
    assert_eq!(
        alice.session_ids_for_device(bob.curve25519_key()).unwrap(),
        vec![first.clone(), second]
    );

    let received = bob
        .decrypt(alice.curve25519_key(), message.message_type, &message.ciphertext)
        .unwrap();
    assert_eq!(received.session_id, first);

    // Group sessions are created in memory and export a key.
    let group = alice.create_outbound_group_session().unwrap();
    assert!(!alice.outbound_group_session_key(&group).unwrap().is_empty());
}
