//! Journal schema definitions and migrations.

use rusqlite::Connection;

use super::error::JournalError;

/// Current schema version. Increment when making schema changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Schema DDL for version 1.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_path TEXT NOT NULL UNIQUE,
    file_size INTEGER NOT NULL,
    media_type TEXT NOT NULL,
    extension TEXT NOT NULL,
    creation_time TEXT NOT NULL,
    larger_dimension INTEGER,
    original_name TEXT NOT NULL DEFAULT '',
    timestamp_key TEXT NOT NULL,
    hash TEXT NOT NULL DEFAULT '',
    dest_path TEXT NOT NULL DEFAULT '',
    sequence_num INTEGER NOT NULL DEFAULT 0,
    is_duplicate INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    error_message TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_files_status ON files(status);
CREATE INDEX IF NOT EXISTS idx_files_file_size ON files(file_size);
CREATE INDEX IF NOT EXISTS idx_files_hash ON files(hash) WHERE hash != '';
CREATE INDEX IF NOT EXISTS idx_files_timestamp_key ON files(timestamp_key);
CREATE INDEX IF NOT EXISTS idx_files_dest_path ON files(dest_path) WHERE dest_path != '';
"#;

/// Get the current schema version from the database.
pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, JournalError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), JournalError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Initialize or migrate the journal schema.
///
/// Idempotent; safe on both new and existing databases.
pub(crate) fn migrate(conn: &Connection) -> Result<(), JournalError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(JournalError::UnsupportedSchemaVersion {
            found: current_version,
            expected: SCHEMA_VERSION,
        });
    }

    if current_version < SCHEMA_VERSION {
        conn.execute_batch(SCHEMA_V1)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        tracing::debug!("Initialized journal schema at version {}", SCHEMA_VERSION);
    }

    Ok(())
}
