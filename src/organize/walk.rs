//! Filesystem traversal: source discovery, destination indexing and
//! empty-directory cleanup. Everything here blocks and runs on
//! `spawn_blocking` threads.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

use crate::journal::DestinationEntry;
use crate::media::{extension_of, MediaType};

/// Directory names created by NAS boxes and operating systems.
const SYSTEM_DIRS: &[&str] = &["@eaDir", "$RECYCLE.BIN", "System Volume Information", "lost+found"];

/// What the source walk should leave out.
#[derive(Debug, Default)]
pub struct WalkOptions {
    /// Source paths already organized by a previous run.
    pub completed: HashSet<PathBuf>,
    /// Individual files to ignore (the journal and its WAL/SHM companions).
    pub ignore_files: Vec<PathBuf>,
    /// Subtrees to ignore, e.g. a destination nested inside the source.
    pub exclude_dirs: Vec<PathBuf>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkStats {
    pub discovered: u64,
    pub skipped_completed: u64,
    pub skipped_unsupported: u64,
}

fn is_hidden_or_system(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && SYSTEM_DIRS.contains(&name.as_ref()))
}

/// Walk the source tree and send every recognized, not yet organized media
/// file down `tx`. Stops early on cancellation or when the receiver is gone.
pub fn walk_source(
    source: &Path,
    options: &WalkOptions,
    tx: &mpsc::Sender<PathBuf>,
    cancel: &CancellationToken,
) -> WalkStats {
    let mut stats = WalkStats::default();

    let walker = WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !is_hidden_or_system(e) && !options.exclude_dirs.iter().any(|d| e.path() == d)
        });

    for entry in walker {
        if cancel.is_cancelled() {
            tracing::debug!("Walk cancelled");
            break;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Directory walk error: {}", e);
                continue;
            }
        };
        // Symlinks are reported with their own type when not following them
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if options.ignore_files.iter().any(|f| f == path) {
            continue;
        }
        if MediaType::from_path(path).is_none() {
            stats.skipped_unsupported += 1;
            continue;
        }
        if options.completed.contains(path) {
            stats.skipped_completed += 1;
            continue;
        }

        stats.discovered += 1;
        if tx.blocking_send(path.to_path_buf()).is_err() {
            tracing::debug!("Path receiver closed, stopping walk");
            break;
        }
    }

    stats
}

/// Collect every recognized media file under the destination roots, skipping
/// anything inside `source` so a run never indexes its own input.
pub fn index_destinations(roots: &[PathBuf], source: &Path) -> Vec<DestinationEntry> {
    let mut entries = Vec::new();
    for root in distinct_roots(roots) {
        if !root.is_dir() {
            continue;
        }
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_hidden_or_system(e) && !e.path().starts_with(source));

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(media_type) = MediaType::from_path(path) else {
                continue;
            };
            let size_bytes = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    tracing::debug!("Cannot stat {}: {}", path.display(), e);
                    continue;
                }
            };
            entries.push(DestinationEntry {
                path: path.to_path_buf(),
                size_bytes,
                media_type,
                extension: extension_of(path),
            });
        }
    }
    entries
}

/// Drop roots nested inside another root so each file is visited once.
fn distinct_roots(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut sorted: Vec<PathBuf> = roots.to_vec();
    sorted.sort();
    sorted.dedup();
    let mut distinct: Vec<PathBuf> = Vec::with_capacity(sorted.len());
    for root in sorted {
        if !distinct.iter().any(|d| root.starts_with(d)) {
            distinct.push(root);
        }
    }
    distinct
}

/// Remove empty directories below `root`, deepest first. `root` itself is kept.
///
/// Returns the number of directories removed.
pub fn remove_empty_dirs(root: &Path) -> usize {
    let mut removed = 0;
    let dirs = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir());

    for dir in dirs {
        let is_empty = fs::read_dir(dir.path())
            .map(|mut it| it.next().is_none())
            .unwrap_or(false);
        if !is_empty {
            continue;
        }
        match fs::remove_dir(dir.path()) {
            Ok(()) => {
                tracing::debug!("Removed empty directory {}", dir.path().display());
                removed += 1;
            }
            Err(e) => tracing::warn!("Could not remove {}: {}", dir.path().display(), e),
        }
    }
    removed
}
