use std::path::PathBuf;

use thiserror::Error;

/// Per-file transfer failures. Each is recorded against the record in the
/// journal and never aborts the run.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Destination already exists: {0}")]
    Collision(PathBuf),

    #[error("Source file no longer exists: {0}")]
    SourceMissing(PathBuf),

    #[error("Size mismatch copying {path}: expected {expected} bytes, wrote {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl TransferError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
