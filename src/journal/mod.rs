//! Persistent journal of discovered media files.
//!
//! One SQLite row per source file records what the organizer decided about it
//! (hash, destination, sequence number, duplicate flag) and how far it got.
//! The journal is the sole source of truth for:
//! - Resuming an interrupted run without redoing finished transfers
//! - Lazy hashing and dedup across runs and source trees
//! - Status reporting

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{Journal, SqliteJournal};
pub use error::JournalError;
pub use types::{DestinationEntry, JournalStats, MediaRecord, RecordStatus};
