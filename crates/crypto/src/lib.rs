//! olmdev-crypto: the end-to-end encryption device layer.
//!
//! Manages the local Olm identity (Curve25519/Ed25519 keys and a pool of
//! one-time keys), the pairwise Olm sessions established with other devices
//! and outbound Megolm group sessions. Account and session state is pickled,
//! encrypted with a pickle key and persisted through a [`storage::KeyStore`].
//! Olm and Megolm primitives come from vodozemac.

pub mod canonical_json;
pub mod config;
pub mod device;
pub mod encoding;
pub mod error;
pub mod group;
pub mod identity;
pub mod message;
pub mod pickle_key;
pub mod registry;
pub mod session;
pub mod signature;
pub mod storage;

pub use device::{DecryptedMessage, InboundSession, OlmDevice};
pub use message::{EncryptedMessage, MessageType};
pub use pickle_key::PickleKey;
