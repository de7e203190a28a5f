//! SQLite-backed [`KeyStore`].

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::CryptoError;
use crate::storage::migrations::run_migrations;
use crate::storage::{now_secs, AccountState, KeyStore, SessionState};

/// Key store persisted in a single SQLite database file.
pub struct SqliteKeyStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteKeyStore").finish_non_exhaustive()
    }
}

fn configure_connection(conn: &Connection) -> Result<(), CryptoError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    Ok(())
}

impl SqliteKeyStore {
    /// Open (creating if needed) the store at `path` and apply migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, CryptoError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CryptoError> {
        configure_connection(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CryptoError> {
        self.conn
            .lock()
            .map_err(|_| CryptoError::StorageError("key store connection lock poisoned".into()))
    }
}

fn write_account(conn: &Connection, state: &AccountState) -> Result<(), CryptoError> {
    let now = now_secs()?;
    conn.execute(
        "INSERT INTO olm_account (id, pickle, created_at, updated_at)
         VALUES (1, ?1, ?2, ?2)
         ON CONFLICT(id) DO UPDATE SET
             pickle = excluded.pickle,
             updated_at = excluded.updated_at",
        params![state.pickle, now],
    )?;
    Ok(())
}

fn write_session(
    conn: &Connection,
    device_key: &str,
    session_id: &str,
    state: &SessionState,
) -> Result<(), CryptoError> {
    let now = now_secs()?;
    let last_used = i64::try_from(state.last_used)
        .map_err(|_| CryptoError::StorageError("last_used stamp out of range".into()))?;
    conn.execute(
        "INSERT INTO olm_sessions (device_key, session_id, pickle, has_received_message, last_used, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(device_key, session_id) DO UPDATE SET
             pickle = excluded.pickle,
             has_received_message = excluded.has_received_message,
             last_used = excluded.last_used",
        params![
            device_key,
            session_id,
            state.pickle,
            state.has_received_message,
            last_used,
            now
        ],
    )?;
    Ok(())
}

impl KeyStore for SqliteKeyStore {
    fn load_account(&self) -> Result<Option<AccountState>, CryptoError> {
        let conn = self.conn()?;
        let pickle = conn
            .query_row("SELECT pickle FROM olm_account WHERE id = 1", [], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(pickle.map(|pickle| AccountState { pickle }))
    }

    fn save_account(&self, state: &AccountState) -> Result<(), CryptoError> {
        let conn = self.conn()?;
        write_account(&conn, state)
    }

    fn load_session(
        &self,
        device_key: &str,
        session_id: &str,
    ) -> Result<Option<SessionState>, CryptoError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT pickle, has_received_message, last_used FROM olm_sessions
                 WHERE device_key = ?1 AND session_id = ?2",
                params![device_key, session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(pickle, has_received_message, last_used)| {
            let last_used = u64::try_from(last_used)
                .map_err(|_| CryptoError::StorageError("negative last_used stamp".into()))?;
            Ok(SessionState {
                pickle,
                has_received_message,
                last_used,
            })
        })
        .transpose()
    }

    fn save_session(
        &self,
        device_key: &str,
        session_id: &str,
        state: &SessionState,
    ) -> Result<(), CryptoError> {
        let conn = self.conn()?;
        write_session(&conn, device_key, session_id, state)
    }

    fn all_session_ids(&self, device_key: &str) -> Result<Vec<String>, CryptoError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id FROM olm_sessions WHERE device_key = ?1
             ORDER BY last_used DESC, session_id",
        )?;
        let ids = stmt
            .query_map([device_key], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn save_account_and_session(
        &self,
        account: &AccountState,
        device_key: &str,
        session_id: &str,
        session: &SessionState,
    ) -> Result<(), CryptoError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        write_session(&tx, device_key, session_id, session)?;
        write_account(&tx, account)?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_state(pickle: &str, last_used: u64) -> SessionState {
        SessionState {
            pickle: pickle.to_string(),
            has_received_message: false,
            last_used,
        }
    }

    #[test]
    fn load_account_returns_none_on_empty_store() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        assert!(store.load_account().unwrap().is_none());
    }

    #[test]
    fn save_then_load_account_round_trips() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        let state = AccountState {
            pickle: "pickled-account".into(),
        };
        store.save_account(&state).unwrap();
        assert_eq!(store.load_account().unwrap(), Some(state));
    }

    #[test]
    fn save_account_overwrites_single_row() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        store
            .save_account(&AccountState { pickle: "v1".into() })
            .unwrap();
        store
            .save_account(&AccountState { pickle: "v2".into() })
            .unwrap();

        let loaded = store.load_account().unwrap().unwrap();
        assert_eq!(loaded.pickle, "v2");

        let rows: i64 = store
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM olm_account", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn load_session_returns_none_for_unknown_device() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        assert!(store.load_session("nobody", "sess").unwrap().is_none());
    }

    #[test]
    fn store_then_load_session_round_trips() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        let state = SessionState {
            pickle: "p".into(),
            has_received_message: true,
            last_used: 1_700_000_000_123,
        };
        store.save_session("dev", "s1", &state).unwrap();
        assert_eq!(store.load_session("dev", "s1").unwrap(), Some(state));
    }

    #[test]
    fn save_session_updates_existing_row() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        store.save_session("dev", "s1", &session_state("a", 1)).unwrap();
        store.save_session("dev", "s1", &session_state("b", 2)).unwrap();

        let loaded = store.load_session("dev", "s1").unwrap().unwrap();
        assert_eq!(loaded.pickle, "b");
        assert_eq!(loaded.last_used, 2);
        assert_eq!(store.all_session_ids("dev").unwrap().len(), 1);
    }

    #[test]
    fn all_session_ids_is_scoped_to_device_and_ordered_by_last_use() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        store.save_session("dev", "old", &session_state("a", 10)).unwrap();
        store.save_session("dev", "new", &session_state("b", 20)).unwrap();
        store.save_session("other", "x", &session_state("c", 30)).unwrap();

        assert_eq!(store.all_session_ids("dev").unwrap(), vec!["new", "old"]);
        assert_eq!(store.all_session_ids("other").unwrap(), vec!["x"]);
        assert!(store.all_session_ids("missing").unwrap().is_empty());
    }

    #[test]
    fn save_account_and_session_writes_both() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        let account = AccountState {
            pickle: "acct".into(),
        };
        store
            .save_account_and_session(&account, "dev", "s1", &session_state("sess", 5))
            .unwrap();

        assert_eq!(store.load_account().unwrap(), Some(account));
        assert!(store.load_session("dev", "s1").unwrap().is_some());
    }

    #[test]
    fn save_account_and_session_rolls_back_on_failure() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        let too_large = SessionState {
            pickle: "sess".into(),
            has_received_message: false,
            last_used: u64::MAX,
        };
        let result = store.save_account_and_session(
            &AccountState {
                pickle: "acct".into(),
            },
            "dev",
            "s1",
            &too_large,
        );

        assert!(matches!(result, Err(CryptoError::StorageError(_))));
        assert!(store.load_account().unwrap().is_none());
        assert!(store.load_session("dev", "s1").unwrap().is_none());
    }

    #[test]
    fn open_on_disk_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");

        {
            let store = SqliteKeyStore::open(&path).unwrap();
            store
                .save_account(&AccountState {
                    pickle: "durable".into(),
                })
                .unwrap();
            store.save_session("dev", "s1", &session_state("p", 3)).unwrap();
        }

        let reopened = SqliteKeyStore::open(&path).unwrap();
        assert_eq!(reopened.load_account().unwrap().unwrap().pickle, "durable");
        assert_eq!(reopened.all_session_ids("dev").unwrap(), vec!["s1"]);
    }
}
