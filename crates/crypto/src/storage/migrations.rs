//! Key store migration runner, tracked in its own `_olm_migrations` table.

use crate::error::CryptoError;
use rusqlite::Connection;

const MIGRATIONS: &[(i32, &str)] = &[(1, MIGRATION_001), (2, MIGRATION_002)];

const MIGRATION_001: &str = "
CREATE TABLE IF NOT EXISTS olm_account (
    id         INTEGER PRIMARY KEY CHECK (id = 1),
    pickle     TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS olm_sessions (
    device_key           TEXT NOT NULL,
    session_id           TEXT NOT NULL,
    pickle               TEXT NOT NULL,
    has_received_message INTEGER NOT NULL DEFAULT 0,
    last_used            INTEGER NOT NULL,
    created_at           INTEGER NOT NULL,
    PRIMARY KEY (device_key, session_id)
);
";

const MIGRATION_002: &str = "
CREATE INDEX IF NOT EXISTS olm_sessions_by_device
    ON olm_sessions (device_key, last_used DESC);
";

pub fn run_migrations(conn: &Connection) -> Result<(), CryptoError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _olm_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _olm_migrations",
        [],
        |row| row.get(0),
    )?;

    for &(version, sql) in MIGRATIONS {
        if version > current_version {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(sql)?;
            tx.execute(
                "INSERT INTO _olm_migrations (version) VALUES (?1)",
                [version],
            )?;
            tx.commit()?;
            tracing::debug!(version, "applied key store migration");
        }
    }

    Ok(())
}
