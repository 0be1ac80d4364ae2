//! Move-or-copy primitive used by the transfer workers.
//!
//! All functions here are synchronous and are run on blocking threads.

use std::fs::{self, FileTimes};
use std::io;
use std::path::{Path, PathBuf};

use super::error::TransferError;

/// How files leave the source tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Move,
    Copy,
}

/// Transfer `source` to `destination`, creating parent directories.
///
/// Never overwrites: an existing destination is a [`TransferError::Collision`].
/// Moves try an atomic rename first and fall back to copy + delete when the
/// paths are on different filesystems.
pub fn transfer(source: &Path, destination: &Path, mode: TransferMode) -> Result<(), TransferError> {
    if !source.exists() {
        return Err(TransferError::SourceMissing(source.to_path_buf()));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| TransferError::io(parent, e))?;
    }
    if destination.exists() {
        return Err(TransferError::Collision(destination.to_path_buf()));
    }

    match mode {
        TransferMode::Copy => copy_verified(source, destination),
        TransferMode::Move => move_file(source, destination),
    }
}

/// Move an already transferred file to a new destination.
///
/// Idempotent: if `from` is gone and `to` exists the move already happened.
pub fn relocate(from: &Path, to: &Path) -> Result<(), TransferError> {
    if from == to {
        return Ok(());
    }
    match (from.exists(), to.exists()) {
        (false, true) => Ok(()),
        (false, false) => Err(TransferError::SourceMissing(from.to_path_buf())),
        (true, true) => Err(TransferError::Collision(to.to_path_buf())),
        (true, false) => {
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(|e| TransferError::io(parent, e))?;
            }
            match move_file(from, to) {
                // Lost a race with another relocation of the same file
                Err(_) if !from.exists() && to.exists() => Ok(()),
                result => result,
            }
        }
    }
}

fn move_file(source: &Path, destination: &Path) -> Result<(), TransferError> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                "Cross-device move, copying {} -> {}",
                source.display(),
                destination.display()
            );
            copy_verified(source, destination)?;
            fs::remove_file(source).map_err(|e| TransferError::io(source, e))
        }
        Err(e) => Err(TransferError::io(source, e)),
    }
}

/// Copy through a hidden `.part` file in the destination directory so the
/// final path only ever holds a complete file.
fn copy_verified(source: &Path, destination: &Path) -> Result<(), TransferError> {
    let part = part_path(destination);
    let result = (|| {
        let expected = fs::metadata(source)
            .map_err(|e| TransferError::io(source, e))?
            .len();
        let written = fs::copy(source, &part).map_err(|e| TransferError::io(source, e))?;
        if written != expected {
            return Err(TransferError::SizeMismatch {
                path: destination.to_path_buf(),
                expected,
                actual: written,
            });
        }
        preserve_mtime(source, &part).map_err(|e| TransferError::io(&part, e))?;
        if destination.exists() {
            return Err(TransferError::Collision(destination.to_path_buf()));
        }
        fs::rename(&part, destination).map_err(|e| TransferError::io(destination, e))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result
}

fn part_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}.part"))
}

fn preserve_mtime(source: &Path, target: &Path) -> io::Result<()> {
    let modified = fs::metadata(source)?.modified()?;
    let times = FileTimes::new().set_modified(modified).set_accessed(modified);
    let file = fs::File::options().write(true).open(target)?;
    file.set_times(times)?;
    Ok(())
}
