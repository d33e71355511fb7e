//! Message store schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: messages and per-session extraction state
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id               TEXT PRIMARY KEY,   -- provider:session_id:message_id
        provider         TEXT NOT NULL,
        session_id       TEXT NOT NULL,
        message_id       TEXT NOT NULL,
        role             TEXT NOT NULL,
        emitted_at       DATETIME,
        content          TEXT NOT NULL,
        parts            JSON NOT NULL,
        tokens_in        INTEGER,
        tokens_out       INTEGER,
        observed_at      DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(provider, session_id);

    CREATE TABLE IF NOT EXISTS extraction_state (
        session_key      TEXT PRIMARY KEY,   -- provider:session_id
        provider         TEXT NOT NULL,
        session_id       TEXT NOT NULL,
        transcript_path  TEXT NOT NULL,
        file_offset      INTEGER NOT NULL,
        last_message_id  TEXT,
        last_extraction  DATETIME NOT NULL
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking message store migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["messages", "extraction_state"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }
}
