//! Types for the journal module.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::media::{MediaFile, MediaType};

/// Storage format of `creation_time`. Lexically sortable.
pub const CREATION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamp prefix shared by generated file names and grouping keys.
pub const NAME_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Status of a record in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// Journaled, not yet transferred.
    Pending,
    /// Moved or copied to its destination.
    Completed,
    /// Transfer failed (reset to pending on the next run).
    Failed,
    /// Destination assigned during a dry run; nothing touched on disk.
    DryRun,
    /// Placeholder for a file already present in a destination tree.
    DestIndex,
}

impl RecordStatus {
    /// Convert to the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DryRun => "dry_run",
            Self::DestIndex => "dest_index",
        }
    }

    /// Parse from the string stored in the database.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "dry_run" => Some(Self::DryRun),
            "dest_index" => Some(Self::DestIndex),
            _ => None,
        }
    }
}

/// One journaled file.
#[derive(Debug, Clone)]
pub struct MediaRecord {
    /// Row id; 0 until inserted.
    pub id: i64,
    pub source_path: PathBuf,
    pub original_name: String,
    pub extension: String,
    /// Grouping key: creation time + type + extension.
    pub timestamp_key: String,
    /// Content digest, `None` until lazily computed.
    pub hash: Option<String>,
    /// Assigned destination, `None` until the organize stage decides it.
    pub destination: Option<PathBuf>,
    pub last_error: Option<String>,

    pub size_bytes: u64,
    pub created: NaiveDateTime,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub larger_dimension: Option<u32>,
    /// 0 means unsequenced.
    pub sequence: u32,

    pub media_type: MediaType,
    pub is_duplicate: bool,
    pub status: RecordStatus,
}

impl MediaRecord {
    /// Create a new pending record from extracted metadata.
    pub fn new_pending(file: &MediaFile) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            source_path: file.source_path.clone(),
            original_name: file.original_name.clone(),
            extension: file.extension.clone(),
            timestamp_key: timestamp_key(&file.created, file.media_type, &file.extension),
            hash: None,
            destination: None,
            last_error: None,
            size_bytes: file.size_bytes,
            created: file.created,
            created_at: now,
            updated_at: now,
            larger_dimension: file.larger_dimension,
            sequence: 0,
            media_type: file.media_type,
            is_duplicate: false,
            status: RecordStatus::Pending,
        }
    }

    /// Path the file currently lives at: the source while it is still there,
    /// otherwise the recorded destination.
    pub fn locate(&self) -> Option<&Path> {
        if self.source_path.exists() {
            return Some(&self.source_path);
        }
        self.destination.as_deref().filter(|d| d.exists())
    }
}

/// Build the grouping key, e.g. `20240115-103000_image_.jpg`.
pub fn timestamp_key(created: &NaiveDateTime, media_type: MediaType, extension: &str) -> String {
    format!(
        "{}_{}_.{}",
        created.format(NAME_TIMESTAMP_FORMAT),
        media_type.as_str(),
        extension
    )
}

/// A file found in a destination tree before processing starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub media_type: MediaType,
    pub extension: String,
}

/// Status histogram of real (non-placeholder) records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalStats {
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
    pub dry_run: u64,
}

impl JournalStats {
    pub fn total(&self) -> u64 {
        self.pending + self.completed + self.failed + self.dry_run
    }

    /// Files whose destination is final, including dry-run assignments.
    pub fn organized(&self) -> u64 {
        self.completed + self.dry_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_file() -> MediaFile {
        MediaFile {
            source_path: PathBuf::from("/src/IMG_1.jpg"),
            original_name: "IMG_1.jpg".to_string(),
            extension: "jpg".to_string(),
            size_bytes: 1024,
            created: NaiveDate::from_ymd_opt(2024, 1, 15)
                .unwrap()
                .and_hms_opt(10, 30, 0)
                .unwrap(),
            larger_dimension: Some(4000),
            media_type: MediaType::Image,
        }
    }

    #[test]
    fn test_record_status_round_trip() {
        for status in [
            RecordStatus::Pending,
            RecordStatus::Completed,
            RecordStatus::Failed,
            RecordStatus::DryRun,
            RecordStatus::DestIndex,
        ] {
            assert_eq!(RecordStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(RecordStatus::from_str("invalid"), None);
    }

    #[test]
    fn test_timestamp_key_format() {
        let file = sample_file();
        assert_eq!(
            timestamp_key(&file.created, MediaType::Image, "jpg"),
            "20240115-103000_image_.jpg"
        );
        assert_ne!(
            timestamp_key(&file.created, MediaType::Image, "png"),
            timestamp_key(&file.created, MediaType::Image, "jpg")
        );
    }

    #[test]
    fn test_new_pending() {
        let record = MediaRecord::new_pending(&sample_file());
        assert_eq!(record.id, 0);
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.sequence, 0);
        assert!(!record.is_duplicate);
        assert!(record.hash.is_none());
        assert!(record.destination.is_none());
        assert_eq!(record.timestamp_key, "20240115-103000_image_.jpg");
        assert_eq!(record.larger_dimension, Some(4000));
    }

    #[test]
    fn test_locate_prefers_source_then_destination() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = MediaRecord::new_pending(&sample_file());
        record.source_path = dir.path().join("gone.jpg");
        assert!(record.locate().is_none());

        let dest = dir.path().join("moved.jpg");
        std::fs::write(&dest, b"x").unwrap();
        record.destination = Some(dest.clone());
        assert_eq!(record.locate(), Some(dest.as_path()));

        std::fs::write(&record.source_path, b"x").unwrap();
        assert_eq!(record.locate(), Some(record.source_path.as_path()));
    }

    #[test]
    fn test_stats_totals() {
        let stats = JournalStats {
            pending: 1,
            completed: 2,
            failed: 3,
            dry_run: 4,
        };
        assert_eq!(stats.total(), 10);
        assert_eq!(stats.organized(), 6);
    }
}
