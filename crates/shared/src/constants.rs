/// Olm wire number for a pre-key (session-establishing) message.
pub const MESSAGE_TYPE_PRE_KEY: usize = 0;
/// Olm wire number for a normal ratchet message.
pub const MESSAGE_TYPE_NORMAL: usize = 1;
/// Length in bytes of the key used to encrypt pickled account/session state.
pub const PICKLE_KEY_LENGTH: usize = 32;
/// Default location of the SQLite key store.
pub const DEFAULT_STORE_PATH: &str = "olm_device.db";
/// Largest integer magnitude allowed in canonical JSON (2^53 - 1).
pub const MAX_CANONICAL_JSON_INTEGER: i64 = (1 << 53) - 1;
