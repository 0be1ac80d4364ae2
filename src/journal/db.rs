//! Journal trait and SQLite implementation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::JournalError;
use super::schema;
use super::types::{
    DestinationEntry, JournalStats, MediaRecord, RecordStatus, CREATION_TIME_FORMAT,
};
use crate::media::MediaType;

/// Timestamp key shared by all destination placeholder rows.
const DEST_INDEX_KEY: &str = "dest_index";
/// Creation time stored for destination placeholder rows.
const DEST_INDEX_CREATION_TIME: &str = "1970-01-01 00:00:00";

const RECORD_COLUMNS: &str = "id, source_path, file_size, media_type, extension, creation_time, \
     larger_dimension, original_name, timestamp_key, hash, dest_path, sequence_num, is_duplicate, \
     status, error_message, created_at, updated_at";

/// Durable bookkeeping of every discovered file.
///
/// Object-safe so it can be shared as `Arc<dyn Journal>` across the pipeline
/// stages. Counting and lookup queries include `dest_index` placeholders unless
/// noted otherwise, so files already present in a destination tree take part
/// in size/hash dedup.
#[async_trait]
pub trait Journal: Send + Sync {
    /// Insert a pending record and return its id.
    ///
    /// Fails with [`JournalError::AlreadyExists`] when a real record for the
    /// same source path exists. A `dest_index` placeholder for the path is
    /// replaced, keeping its hash.
    async fn insert(&self, record: &MediaRecord) -> Result<i64, JournalError>;

    /// Fetch one record.
    async fn get(&self, id: i64) -> Result<Option<MediaRecord>, JournalError>;

    /// Set status and error message. Last write wins.
    async fn update_status(
        &self,
        id: i64,
        status: RecordStatus,
        error: Option<&str>,
    ) -> Result<(), JournalError>;

    async fn update_hash(&self, id: i64, hash: &str) -> Result<(), JournalError>;

    /// Set destination, sequence number and duplicate flag in one statement.
    async fn update_destination(
        &self,
        id: i64,
        destination: &Path,
        sequence: u32,
        is_duplicate: bool,
    ) -> Result<(), JournalError>;

    async fn count_by_size(&self, size_bytes: u64) -> Result<u64, JournalError>;

    async fn count_by_timestamp_key(&self, key: &str) -> Result<u64, JournalError>;

    /// All records carrying `hash`. An empty hash matches nothing.
    async fn find_by_hash(&self, hash: &str) -> Result<Vec<MediaRecord>, JournalError>;

    /// Records of the given size that have not been hashed yet.
    async fn find_unhashed_by_size(&self, size_bytes: u64)
        -> Result<Vec<MediaRecord>, JournalError>;

    /// Earliest real record in a group that still has sequence 0, other than
    /// `exclude_id`.
    async fn first_unsequenced_by_timestamp_key(
        &self,
        key: &str,
        exclude_id: i64,
    ) -> Result<Option<MediaRecord>, JournalError>;

    /// Whether a record other than `exclude_id` already owns `destination`.
    async fn destination_claimed(
        &self,
        destination: &Path,
        exclude_id: i64,
    ) -> Result<bool, JournalError>;

    /// Source paths already `completed` or `dry_run`.
    async fn completed_source_paths(&self) -> Result<HashSet<PathBuf>, JournalError>;

    /// `pending` records that already have a destination assigned.
    async fn pending_with_destination(&self) -> Result<Vec<MediaRecord>, JournalError>;

    /// Move every `failed` record back to `pending`, clearing its error.
    ///
    /// Returns the number of records reset.
    async fn reset_failed(&self) -> Result<u64, JournalError>;

    /// Delete `pending` records that never got a destination.
    async fn discard_unassigned(&self) -> Result<u64, JournalError>;

    /// Status histogram, excluding placeholders.
    async fn stats(&self) -> Result<JournalStats, JournalError>;

    /// Number of real records, excluding placeholders.
    async fn total_count(&self) -> Result<u64, JournalError>;

    /// Number of real records flagged as duplicates.
    async fn duplicate_count(&self) -> Result<u64, JournalError>;

    async fn failed_records(&self) -> Result<Vec<MediaRecord>, JournalError>;

    /// Remove `dest_index` placeholders; with `keep_hashed` only unhashed ones.
    async fn clear_destination_index(&self, keep_hashed: bool) -> Result<u64, JournalError>;

    /// Insert placeholders, ignoring paths that are already journaled.
    ///
    /// Returns the number actually inserted.
    async fn bulk_insert_destination_entries(
        &self,
        entries: &[DestinationEntry],
    ) -> Result<u64, JournalError>;
}

/// SQLite implementation of the journal.
pub struct SqliteJournal {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteJournal")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteJournal {
    /// Open or create a journal at the given path.
    pub async fn open(path: &Path) -> Result<Self, JournalError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| JournalError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            // WAL lets the status command read while a run is writing
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            if !mode.eq_ignore_ascii_case("wal") {
                tracing::warn!("Journal is using {} mode instead of WAL", mode);
            }
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.busy_timeout(Duration::from_secs(5))?;

            schema::migrate(&conn)?;

            Ok::<_, JournalError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory journal (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, JournalError> {
        let conn = Connection::open_in_memory().map_err(|e| JournalError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, JournalError> {
        self.conn
            .lock()
            .map_err(|e| JournalError::Query(e.to_string()))
    }

    fn query_records(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<MediaRecord>, JournalError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {RECORD_COLUMNS} FROM files WHERE {filter} ORDER BY id");
        let mut stmt = conn.prepare_cached(&sql).map_err(JournalError::query)?;
        let records = stmt
            .query_map(params, row_to_record)
            .map_err(JournalError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(JournalError::query)?;
        Ok(records)
    }

    fn count(&self, filter: &str, params: impl rusqlite::Params) -> Result<u64, JournalError> {
        let conn = self.lock()?;
        let sql = format!("SELECT COUNT(*) FROM files WHERE {filter}");
        let count: i64 = conn
            .query_row(&sql, params, |row| row.get(0))
            .map_err(JournalError::query)?;
        Ok(count as u64)
    }
}

#[async_trait]
impl Journal for SqliteJournal {
    async fn insert(&self, record: &MediaRecord) -> Result<i64, JournalError> {
        let now = Utc::now().timestamp();
        let conn = self.lock()?;

        let id: Option<i64> = conn
            .query_row(
                r#"
                INSERT INTO files (source_path, file_size, media_type, extension, creation_time,
                    larger_dimension, original_name, timestamp_key, hash, dest_path, sequence_num,
                    is_duplicate, status, error_message, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 'pending', NULL, ?13, ?13)
                ON CONFLICT(source_path) DO UPDATE SET
                    file_size = excluded.file_size,
                    media_type = excluded.media_type,
                    extension = excluded.extension,
                    creation_time = excluded.creation_time,
                    larger_dimension = excluded.larger_dimension,
                    original_name = excluded.original_name,
                    timestamp_key = excluded.timestamp_key,
                    hash = CASE WHEN excluded.hash != '' THEN excluded.hash ELSE files.hash END,
                    dest_path = excluded.dest_path,
                    sequence_num = excluded.sequence_num,
                    is_duplicate = excluded.is_duplicate,
                    status = 'pending',
                    error_message = NULL,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at
                WHERE files.status = 'dest_index'
                RETURNING id
                "#,
                rusqlite::params![
                    record.source_path.to_string_lossy(),
                    record.size_bytes as i64,
                    record.media_type.as_str(),
                    record.extension,
                    record.created.format(CREATION_TIME_FORMAT).to_string(),
                    record.larger_dimension,
                    record.original_name,
                    record.timestamp_key,
                    record.hash.as_deref().unwrap_or(""),
                    record
                        .destination
                        .as_ref()
                        .map(|d| d.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    record.sequence,
                    record.is_duplicate,
                    now,
                ],
                |row| row.get(0),
            )
            .optional()
            .map_err(JournalError::query)?;

        id.ok_or_else(|| JournalError::AlreadyExists(record.source_path.clone()))
    }

    async fn get(&self, id: i64) -> Result<Option<MediaRecord>, JournalError> {
        Ok(self.query_records("id = ?1", [id])?.into_iter().next())
    }

    async fn update_status(
        &self,
        id: i64,
        status: RecordStatus,
        error: Option<&str>,
    ) -> Result<(), JournalError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE files SET status = ?1, error_message = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![status.as_str(), error, Utc::now().timestamp(), id],
        )
        .map_err(JournalError::query)?;
        Ok(())
    }

    async fn update_hash(&self, id: i64, hash: &str) -> Result<(), JournalError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE files SET hash = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![hash, Utc::now().timestamp(), id],
        )
        .map_err(JournalError::query)?;
        Ok(())
    }

    async fn update_destination(
        &self,
        id: i64,
        destination: &Path,
        sequence: u32,
        is_duplicate: bool,
    ) -> Result<(), JournalError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE files SET dest_path = ?1, sequence_num = ?2, is_duplicate = ?3, updated_at = ?4 WHERE id = ?5",
            rusqlite::params![
                destination.to_string_lossy(),
                sequence,
                is_duplicate,
                Utc::now().timestamp(),
                id
            ],
        )
        .map_err(JournalError::query)?;
        Ok(())
    }

    async fn count_by_size(&self, size_bytes: u64) -> Result<u64, JournalError> {
        self.count("file_size = ?1", [size_bytes as i64])
    }

    async fn count_by_timestamp_key(&self, key: &str) -> Result<u64, JournalError> {
        self.count("timestamp_key = ?1", [key])
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Vec<MediaRecord>, JournalError> {
        if hash.is_empty() {
            return Ok(Vec::new());
        }
        self.query_records("hash = ?1", [hash])
    }

    async fn find_unhashed_by_size(
        &self,
        size_bytes: u64,
    ) -> Result<Vec<MediaRecord>, JournalError> {
        self.query_records("file_size = ?1 AND hash = ''", [size_bytes as i64])
    }

    async fn first_unsequenced_by_timestamp_key(
        &self,
        key: &str,
        exclude_id: i64,
    ) -> Result<Option<MediaRecord>, JournalError> {
        let found = self.query_records(
            "timestamp_key = ?1 AND sequence_num = 0 AND status != 'dest_index' AND id != ?2",
            rusqlite::params![key, exclude_id],
        )?;
        Ok(found.into_iter().next())
    }

    async fn destination_claimed(
        &self,
        destination: &Path,
        exclude_id: i64,
    ) -> Result<bool, JournalError> {
        let count = self.count(
            "dest_path = ?1 AND id != ?2",
            rusqlite::params![destination.to_string_lossy(), exclude_id],
        )?;
        Ok(count > 0)
    }

    async fn completed_source_paths(&self) -> Result<HashSet<PathBuf>, JournalError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT source_path FROM files WHERE status IN ('completed', 'dry_run')",
            )
            .map_err(JournalError::query)?;
        let paths = stmt
            .query_map([], |row| Ok(PathBuf::from(row.get::<_, String>(0)?)))
            .map_err(JournalError::query)?
            .collect::<Result<HashSet<_>, _>>()
            .map_err(JournalError::query)?;
        Ok(paths)
    }

    async fn pending_with_destination(&self) -> Result<Vec<MediaRecord>, JournalError> {
        self.query_records("status = 'pending' AND dest_path != ''", [])
    }

    async fn reset_failed(&self) -> Result<u64, JournalError> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE files SET status = 'pending', error_message = NULL, updated_at = ?1 WHERE status = 'failed'",
                [Utc::now().timestamp()],
            )
            .map_err(JournalError::query)?;
        Ok(rows as u64)
    }

    async fn discard_unassigned(&self) -> Result<u64, JournalError> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "DELETE FROM files WHERE status = 'pending' AND dest_path = ''",
                [],
            )
            .map_err(JournalError::query)?;
        Ok(rows as u64)
    }

    async fn stats(&self) -> Result<JournalStats, JournalError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT status, COUNT(*) FROM files WHERE status != 'dest_index' GROUP BY status",
            )
            .map_err(JournalError::query)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(JournalError::query)?;

        let mut stats = JournalStats::default();
        for row in rows {
            let (status, count) = row.map_err(JournalError::query)?;
            let count = count as u64;
            match RecordStatus::from_str(&status) {
                Some(RecordStatus::Pending) => stats.pending = count,
                Some(RecordStatus::Completed) => stats.completed = count,
                Some(RecordStatus::Failed) => stats.failed = count,
                Some(RecordStatus::DryRun) => stats.dry_run = count,
                Some(RecordStatus::DestIndex) | None => {
                    tracing::warn!("Unknown status '{}' in journal", status);
                }
            }
        }
        Ok(stats)
    }

    async fn total_count(&self) -> Result<u64, JournalError> {
        self.count("status != 'dest_index'", [])
    }

    async fn duplicate_count(&self) -> Result<u64, JournalError> {
        self.count("is_duplicate = 1 AND status != 'dest_index'", [])
    }

    async fn failed_records(&self) -> Result<Vec<MediaRecord>, JournalError> {
        self.query_records("status = 'failed'", [])
    }

    async fn clear_destination_index(&self, keep_hashed: bool) -> Result<u64, JournalError> {
        let conn = self.lock()?;
        let sql = if keep_hashed {
            "DELETE FROM files WHERE status = 'dest_index' AND hash = ''"
        } else {
            "DELETE FROM files WHERE status = 'dest_index'"
        };
        let rows = conn.execute(sql, []).map_err(JournalError::query)?;
        Ok(rows as u64)
    }

    async fn bulk_insert_destination_entries(
        &self,
        entries: &[DestinationEntry],
    ) -> Result<u64, JournalError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let conn = self.lock()?;
        let now = Utc::now().timestamp();

        conn.execute("BEGIN TRANSACTION", [])
            .map_err(JournalError::query)?;

        let result = (|| {
            let mut stmt = conn
                .prepare_cached(
                    r#"
                    INSERT OR IGNORE INTO files (source_path, file_size, media_type, extension,
                        creation_time, original_name, timestamp_key, status, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'dest_index', ?8, ?8)
                    "#,
                )
                .map_err(JournalError::query)?;

            let mut inserted = 0u64;
            for entry in entries {
                let name = entry
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                inserted += stmt
                    .execute(rusqlite::params![
                        entry.path.to_string_lossy(),
                        entry.size_bytes as i64,
                        entry.media_type.as_str(),
                        entry.extension,
                        DEST_INDEX_CREATION_TIME,
                        name,
                        DEST_INDEX_KEY,
                        now,
                    ])
                    .map_err(JournalError::query)? as u64;
            }

            Ok::<_, JournalError>(inserted)
        })();

        match result {
            Ok(inserted) => {
                conn.execute("COMMIT", []).map_err(JournalError::query)?;
                Ok(inserted)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }
}

/// Convert a database row to a MediaRecord.
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaRecord> {
    let source_path: String = row.get(1)?;
    let media_type: String = row.get(3)?;
    let creation_time: String = row.get(5)?;
    let hash: String = row.get(9)?;
    let dest_path: String = row.get(10)?;
    let status: String = row.get(13)?;
    let created_at: i64 = row.get(15)?;
    let updated_at: i64 = row.get(16)?;

    Ok(MediaRecord {
        id: row.get(0)?,
        source_path: PathBuf::from(source_path),
        original_name: row.get(7)?,
        extension: row.get(4)?,
        timestamp_key: row.get(8)?,
        hash: Some(hash).filter(|h| !h.is_empty()),
        destination: Some(dest_path)
            .filter(|d| !d.is_empty())
            .map(PathBuf::from),
        last_error: row.get(14)?,
        size_bytes: row.get::<_, i64>(2)? as u64,
        created: NaiveDateTime::parse_from_str(&creation_time, CREATION_TIME_FORMAT)
            .unwrap_or(DateTime::UNIX_EPOCH.naive_utc()),
        created_at: Utc
            .timestamp_opt(created_at, 0)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH),
        updated_at: Utc
            .timestamp_opt(updated_at, 0)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH),
        larger_dimension: row.get(6)?,
        sequence: row.get(11)?,
        media_type: MediaType::from_str(&media_type)
            .ok_or_else(|| unrecognized_value(3, &media_type))?,
        is_duplicate: row.get(12)?,
        status: RecordStatus::from_str(&status).ok_or_else(|| unrecognized_value(13, &status))?,
    })
}

/// A text column holding a value this version does not know.
fn unrecognized_value(column: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unrecognized value '{value}'").into(),
    )
}
