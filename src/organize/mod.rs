//! Organize pipeline: walk → extract → organize → transfer.
//!
//! The walk runs on a blocking thread and feeds a bounded path queue. Metadata
//! extraction fans out over `jobs` blocking workers. Every journal decision
//! (insert, lazy hashing, dedup, sequencing, destination assignment) is made
//! by a single organize loop on the calling task, which then hands transfer
//! jobs to `jobs` parallel transfer workers through a second bounded queue.

pub mod error;
pub mod paths;
pub mod progress;
pub mod transfer;
pub mod walk;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::OrganizeConfig;
use crate::journal::{Journal, JournalError, MediaRecord, RecordStatus};
use crate::media::{ContentHasher, MediaFile, MetadataExtractor};
use progress::Progress;
use transfer::TransferMode;
use walk::WalkOptions;

/// Capacity of the path and job queues.
const QUEUE_CAPACITY: usize = 100;

/// Highest sequence number tried when bumping past collisions.
const MAX_SEQUENCE: u32 = 9999;

/// One file ready to leave the source tree.
#[derive(Debug, Clone)]
struct TransferJob {
    id: i64,
    source: PathBuf,
    destination: PathBuf,
}

/// End-of-run totals. Journal-backed counts are re-queried after all stages
/// drained; the rest are in-memory counts for files that never reached it.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total: u64,
    /// Completed plus dry-run.
    pub organized: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub pending: u64,
    /// Files dropped by the extract stage.
    pub skipped: u64,
    /// Files skipped by the walk because a previous run completed them.
    pub already_done: u64,
    pub requeued: u64,
    pub indexed: u64,
    pub cancelled: bool,
    pub elapsed: Duration,
}

pub struct Organizer {
    config: OrganizeConfig,
    journal: Arc<dyn Journal>,
    extractor: Arc<dyn MetadataExtractor>,
    hasher: Arc<dyn ContentHasher>,
    progress: Arc<Progress>,
}

impl Organizer {
    pub fn new(
        config: OrganizeConfig,
        journal: Arc<dyn Journal>,
        extractor: Arc<dyn MetadataExtractor>,
        hasher: Arc<dyn ContentHasher>,
    ) -> Self {
        Self {
            config,
            journal,
            extractor,
            hasher,
            progress: Arc::new(Progress::default()),
        }
    }

    fn mode(&self) -> TransferMode {
        if self.config.copy_files {
            TransferMode::Copy
        } else {
            TransferMode::Move
        }
    }

    /// Run the whole pipeline until the source is exhausted or `cancel` fires.
    ///
    /// Per-file failures are recorded in the journal; only journal-level
    /// failures during bootstrap or the final tally abort the run.
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        let pb = progress::create_progress_bar(self.config.no_progress_bar);
        let reporter_done = CancellationToken::new();
        let reporter =
            progress::spawn_reporter(self.progress.clone(), pb, reporter_done.clone());

        let mut completed = HashSet::new();
        let mut requeue = Vec::new();
        if self.config.resume {
            completed = self.journal.completed_source_paths().await?;
            let reset = self.journal.reset_failed().await?;
            let discarded = self.journal.discard_unassigned().await?;
            requeue = self.journal.pending_with_destination().await?;
            tracing::info!(
                completed = completed.len(),
                retrying = reset,
                discarded,
                requeued = requeue.len(),
                "Resuming from journal {}",
                self.config.db_path.display()
            );
        }

        summary.indexed = self.index_destinations().await?;

        let (path_tx, path_rx) = mpsc::channel::<PathBuf>(QUEUE_CAPACITY);
        let (job_tx, job_rx) = mpsc::channel::<TransferJob>(QUEUE_CAPACITY);

        let stage = TransferStage {
            journal: self.journal.clone(),
            progress: self.progress.clone(),
            mode: self.mode(),
            dry_run: self.config.dry_run,
        };
        let transfer_task = tokio::spawn(stage.run(job_rx, self.config.jobs, cancel.clone()));

        summary.requeued = self.requeue(requeue, &job_tx).await;

        let walk_options = WalkOptions {
            completed,
            ignore_files: journal_files(&self.config.db_path),
            exclude_dirs: self
                .config
                .layout
                .destination_roots()
                .into_iter()
                .filter(|root| root.starts_with(&self.config.source) && *root != self.config.source)
                .collect(),
        };
        let walk_source = self.config.source.clone();
        let walk_cancel = cancel.clone();
        let walk_task = tokio::task::spawn_blocking(move || {
            walk::walk_source(&walk_source, &walk_options, &path_tx, &walk_cancel)
        });

        summary.skipped = self.organize_loop(path_rx, &job_tx, &cancel).await;

        drop(job_tx);
        match walk_task.await {
            Ok(stats) => {
                summary.already_done = stats.skipped_completed;
                tracing::debug!(
                    discovered = stats.discovered,
                    unsupported = stats.skipped_unsupported,
                    "Walk finished"
                );
            }
            Err(e) => tracing::error!("Walk task failed: {}", e),
        }
        if let Err(e) = transfer_task.await {
            tracing::error!("Transfer task failed: {}", e);
        }

        let cleared = self.journal.clear_destination_index(true).await?;
        tracing::debug!(cleared, "Cleared unhashed destination placeholders");

        summary.cancelled = cancel.is_cancelled();
        if self.config.delete_empty_dirs
            && !self.config.dry_run
            && !self.config.copy_files
            && !summary.cancelled
        {
            let root = self.config.source.clone();
            let removed = tokio::task::spawn_blocking(move || walk::remove_empty_dirs(&root)).await?;
            tracing::info!("Removed {} empty directories", removed);
        }

        reporter_done.cancel();
        let _ = reporter.await;

        let stats = self.journal.stats().await?;
        summary.total = self.journal.total_count().await?;
        summary.organized = stats.organized();
        summary.errors = stats.failed;
        summary.pending = stats.pending;
        summary.duplicates = self.journal.duplicate_count().await?;
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    /// Refresh `dest_index` placeholders for every configured destination.
    async fn index_destinations(&self) -> Result<u64, JournalError> {
        self.journal.clear_destination_index(true).await?;
        let roots = self.config.layout.destination_roots();
        let source = self.config.source.clone();
        let entries =
            tokio::task::spawn_blocking(move || walk::index_destinations(&roots, &source)).await?;
        if entries.is_empty() {
            return Ok(0);
        }
        let inserted = self.journal.bulk_insert_destination_entries(&entries).await?;
        tracing::info!(
            found = entries.len(),
            inserted,
            "Indexed existing files in destinations"
        );
        Ok(inserted)
    }

    /// Re-queue records a previous run already assigned. They skip dedup and
    /// path assignment.
    async fn requeue(&self, records: Vec<MediaRecord>, job_tx: &mpsc::Sender<TransferJob>) -> u64 {
        let mut requeued = 0;
        for record in records {
            let Some(destination) = record.destination.clone() else {
                continue;
            };
            if record.source_path.exists() {
                self.progress.add_discovered(1);
                let job = TransferJob {
                    id: record.id,
                    source: record.source_path,
                    destination,
                };
                if job_tx.send(job).await.is_err() {
                    break;
                }
                requeued += 1;
                continue;
            }

            // A transfer that finished right before the previous run died
            let (status, error) = if destination.exists() {
                (RecordStatus::Completed, None)
            } else {
                (RecordStatus::Failed, Some("source file no longer exists"))
            };
            if let Err(e) = self.journal.update_status(record.id, status, error).await {
                tracing::error!(
                    "Failed to update {}: {}",
                    record.source_path.display(),
                    e
                );
            }
        }
        requeued
    }

    /// Extract metadata in parallel and feed every result through
    /// [`Self::organize_one`] in arrival order. Returns the number of files
    /// that never made it into the journal.
    async fn organize_loop(
        &self,
        path_rx: mpsc::Receiver<PathBuf>,
        job_tx: &mpsc::Sender<TransferJob>,
        cancel: &CancellationToken,
    ) -> u64 {
        let extractor = self.extractor.clone();
        let progress = self.progress.clone();
        let extracted = stream::unfold(path_rx, |mut rx| async move {
            rx.recv().await.map(|path| (path, rx))
        })
        .map(|path| {
            progress.add_discovered(1);
            let extractor = extractor.clone();
            async move {
                let target = path.clone();
                let result = tokio::task::spawn_blocking(move || extractor.extract(&target)).await;
                (path, result)
            }
        })
        .buffer_unordered(self.config.jobs);
        tokio::pin!(extracted);

        let mut skipped = 0;
        while let Some((path, result)) = extracted.next().await {
            if cancel.is_cancelled() {
                tracing::info!("Shutdown requested, not organizing further files");
                break;
            }
            let file = match result {
                Ok(Ok(file)) => file,
                Ok(Err(e)) => {
                    tracing::warn!("Skipping {}: {}", path.display(), e);
                    self.skip();
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!("Metadata worker failed on {}: {}", path.display(), e);
                    self.skip();
                    skipped += 1;
                    continue;
                }
            };

            match self.organize_one(file).await {
                Ok(Some(job)) => {
                    if job_tx.send(job).await.is_err() {
                        tracing::debug!("Transfer stage gone, stopping organize loop");
                        break;
                    }
                }
                Ok(None) => self.progress.inc_processed(),
                Err(e) => {
                    tracing::error!("Journal error organizing {}: {}", path.display(), e);
                    self.progress.inc_failed();
                    self.progress.inc_processed();
                }
            }
        }
        skipped
    }

    fn skip(&self) {
        self.progress.inc_skipped();
        self.progress.inc_processed();
    }

    /// Journal one file, decide its destination and build its transfer job.
    ///
    /// Returns `None` when the file needs no transfer (already journaled, or
    /// failed before a destination could be assigned).
    async fn organize_one(&self, file: MediaFile) -> Result<Option<TransferJob>, JournalError> {
        let mut record = MediaRecord::new_pending(&file);
        record.id = match self.journal.insert(&record).await {
            Ok(id) => id,
            Err(JournalError::AlreadyExists(path)) => {
                tracing::debug!("Already journaled, skipping {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut is_duplicate = false;
        if self.journal.count_by_size(record.size_bytes).await? >= 2 {
            match self.hash_file(&record.source_path).await? {
                Ok(hash) => {
                    self.journal.update_hash(record.id, &hash).await?;
                    self.backfill_hashes(record.size_bytes, record.id).await?;

                    let matches = self.journal.find_by_hash(&hash).await?;
                    if let Some(original) = matches.iter().find(|m| m.id != record.id) {
                        tracing::info!(
                            "Duplicate: {} matches {}",
                            record.source_path.display(),
                            original.source_path.display()
                        );
                        is_duplicate = true;
                    }
                    record.hash = Some(hash);
                }
                // Organized without a hash; it just cannot be matched as a duplicate
                Err(e) => tracing::warn!(
                    "Cannot hash {}, skipping duplicate check: {}",
                    record.source_path.display(),
                    e
                ),
            }
        }

        let group = self.journal.count_by_timestamp_key(&record.timestamp_key).await?;
        let mut sequence = 0;
        if group > 1 {
            sequence = u32::try_from(group).unwrap_or(MAX_SEQUENCE);
            self.sequence_first_sibling(&record).await?;
        }

        let layout = &self.config.layout;
        let mut destination = paths::destination_path(&record, layout, is_duplicate, sequence);
        while self.journal.destination_claimed(&destination, record.id).await?
            || destination.exists()
        {
            if sequence >= MAX_SEQUENCE {
                let message = format!("no free destination name near {}", destination.display());
                tracing::error!("{}: {}", record.source_path.display(), message);
                self.journal
                    .update_status(record.id, RecordStatus::Failed, Some(message.as_str()))
                    .await?;
                self.progress.inc_failed();
                return Ok(None);
            }
            sequence += 1;
            destination = paths::destination_path(&record, layout, is_duplicate, sequence);
        }

        self.journal
            .update_destination(record.id, &destination, sequence, is_duplicate)
            .await?;
        tracing::debug!(
            "Assigned {} -> {}",
            record.source_path.display(),
            destination.display()
        );

        Ok(Some(TransferJob {
            id: record.id,
            source: record.source_path,
            destination,
        }))
    }

    async fn hash_file(&self, path: &Path) -> Result<std::io::Result<String>, JournalError> {
        let hasher = self.hasher.clone();
        let path = path.to_path_buf();
        Ok(tokio::task::spawn_blocking(move || hasher.hash(&path)).await?)
    }

    /// Hash every other unhashed record of the same size, reading each from
    /// wherever it currently lives.
    async fn backfill_hashes(&self, size_bytes: u64, current_id: i64) -> Result<(), JournalError> {
        for candidate in self.journal.find_unhashed_by_size(size_bytes).await? {
            if candidate.id == current_id {
                continue;
            }
            let Some((id, hash)) = self.hash_record(candidate).await? else {
                continue;
            };
            self.journal.update_hash(id, &hash).await?;
        }
        Ok(())
    }

    /// Hash one record, retrying once from a fresh journal read in case a
    /// transfer moved the file in between. `None` when it cannot be found.
    async fn hash_record(
        &self,
        record: MediaRecord,
    ) -> Result<Option<(i64, String)>, JournalError> {
        let mut current = record;
        for attempt in 0..2 {
            let Some(path) = current.locate().map(Path::to_path_buf) else {
                tracing::debug!(
                    "Cannot locate {} for hashing, skipping",
                    current.source_path.display()
                );
                return Ok(None);
            };
            match self.hash_file(&path).await? {
                Ok(hash) => return Ok(Some((current.id, hash))),
                Err(e) if attempt == 0 => {
                    tracing::debug!("Hashing {} failed, retrying: {}", path.display(), e);
                    match self.journal.get(current.id).await? {
                        Some(fresh) => current = fresh,
                        None => return Ok(None),
                    }
                }
                Err(e) => {
                    tracing::warn!("Skipping hash of {}: {}", path.display(), e);
                }
            }
        }
        Ok(None)
    }

    /// Give the earliest unsequenced sibling of `record` sequence 1 so no
    /// member of a timestamp group is left unsuffixed.
    async fn sequence_first_sibling(&self, record: &MediaRecord) -> Result<(), JournalError> {
        let Some(first) = self
            .journal
            .first_unsequenced_by_timestamp_key(&record.timestamp_key, record.id)
            .await?
        else {
            return Ok(());
        };
        let Some(old) = first.destination.clone() else {
            return Ok(());
        };

        let new = paths::destination_path(&first, &self.config.layout, first.is_duplicate, 1);
        if self.journal.destination_claimed(&new, first.id).await? || new.exists() {
            tracing::warn!(
                "Cannot sequence {}: {} is already taken",
                first.source_path.display(),
                new.display()
            );
            return Ok(());
        }
        self.journal
            .update_destination(first.id, &new, 1, first.is_duplicate)
            .await?;
        tracing::debug!("Resequenced {} -> {}", old.display(), new.display());

        // A transfer still in flight relocates on its own after finishing
        let refreshed = self.journal.get(first.id).await?;
        if self.config.dry_run
            || refreshed.map(|r| r.status) != Some(RecordStatus::Completed)
        {
            return Ok(());
        }
        let target = new.clone();
        match tokio::task::spawn_blocking(move || transfer::relocate(&old, &target)).await? {
            Ok(()) => {}
            Err(e) => tracing::warn!("Could not relocate to {}: {}", new.display(), e),
        }
        Ok(())
    }
}

/// The journal file plus its SQLite WAL and shared-memory companions.
fn journal_files(db_path: &Path) -> Vec<PathBuf> {
    let mut files = vec![db_path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(suffix);
        files.push(PathBuf::from(name));
    }
    files
}

/// State shared by the transfer workers.
#[derive(Clone)]
struct TransferStage {
    journal: Arc<dyn Journal>,
    progress: Arc<Progress>,
    mode: TransferMode,
    dry_run: bool,
}

impl TransferStage {
    /// Drain `jobs` with up to `concurrency` transfers in flight. Stops taking
    /// new jobs once `cancel` fires and lets in-flight ones finish.
    async fn run(
        self,
        jobs: mpsc::Receiver<TransferJob>,
        concurrency: usize,
        cancel: CancellationToken,
    ) {
        stream::unfold(jobs, |mut rx| async move { rx.recv().await.map(|job| (job, rx)) })
            .take_while(|_| std::future::ready(!cancel.is_cancelled()))
            .map(|job| {
                let stage = self.clone();
                async move { stage.run_job(job).await }
            })
            .buffer_unordered(concurrency)
            .for_each(|()| async {})
            .await;
    }

    async fn run_job(&self, job: TransferJob) {
        if self.dry_run {
            let verb = match self.mode {
                TransferMode::Move => "move",
                TransferMode::Copy => "copy",
            };
            tracing::info!(
                "[DRY RUN] Would {} {} -> {}",
                verb,
                job.source.display(),
                job.destination.display()
            );
            self.set_status(&job, RecordStatus::DryRun, None).await;
            self.progress.inc_transferred();
            self.progress.inc_processed();
            return;
        }

        let (source, destination, mode) = (job.source.clone(), job.destination.clone(), self.mode);
        let result =
            tokio::task::spawn_blocking(move || transfer::transfer(&source, &destination, mode))
                .await;
        match result {
            Ok(Ok(())) => {
                tracing::debug!(
                    "Transferred {} -> {}",
                    job.source.display(),
                    job.destination.display()
                );
                self.set_status(&job, RecordStatus::Completed, None).await;
                self.follow_resequence(&job).await;
                self.progress.inc_transferred();
            }
            Ok(Err(e)) => {
                tracing::error!("Transfer failed for {}: {}", job.source.display(), e);
                let message = e.to_string();
                self.set_status(&job, RecordStatus::Failed, Some(message.as_str()))
                    .await;
                self.progress.inc_failed();
            }
            Err(e) => {
                tracing::error!("Transfer worker failed for {}: {}", job.source.display(), e);
                let message = e.to_string();
                self.set_status(&job, RecordStatus::Failed, Some(message.as_str()))
                    .await;
                self.progress.inc_failed();
            }
        }
        self.progress.inc_processed();
    }

    async fn set_status(&self, job: &TransferJob, status: RecordStatus, error: Option<&str>) {
        if let Err(e) = self.journal.update_status(job.id, status, error).await {
            tracing::error!(
                "Failed to record {} for {}: {}",
                status.as_str(),
                job.source.display(),
                e
            );
        }
    }

    /// Move the file again if the organize loop re-sequenced it while the
    /// transfer was in flight.
    async fn follow_resequence(&self, job: &TransferJob) {
        let current = match self.journal.get(job.id).await {
            Ok(Some(record)) => record.destination,
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Could not re-read record {}: {}", job.id, e);
                None
            }
        };
        let Some(current) = current.filter(|d| *d != job.destination) else {
            return;
        };
        let from = job.destination.clone();
        let to = current.clone();
        match tokio::task::spawn_blocking(move || transfer::relocate(&from, &to)).await {
            Ok(Ok(())) => tracing::debug!(
                "Relocated {} -> {}",
                job.destination.display(),
                current.display()
            ),
            Ok(Err(e)) => tracing::warn!("Could not relocate to {}: {}", current.display(), e),
            Err(e) => tracing::warn!("Relocation worker failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::journal::SqliteJournal;
    use crate::media::{extension_of, Blake3Hasher, ExtractError, MediaType};
    use crate::types::OrganizationScheme;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::collections::HashMap;
    use std::fs;

    /// Reports the same capture time for every file.
    struct StubExtractor {
        created: NaiveDateTime,
        dimension: Option<u32>,
    }

    impl MetadataExtractor for StubExtractor {
        fn extract(&self, path: &Path) -> Result<MediaFile, ExtractError> {
            let media_type = MediaType::from_path(path)
                .ok_or_else(|| ExtractError::Unsupported(path.to_path_buf()))?;
            let size_bytes = fs::metadata(path)
                .map_err(|e| ExtractError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?
                .len();
            Ok(MediaFile {
                source_path: path.to_path_buf(),
                original_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                extension: extension_of(path),
                size_bytes,
                created: self.created,
                larger_dimension: self.dimension,
                media_type,
            })
        }
    }

    /// Fails for one file name, hashes everything else normally.
    struct UnreadableHasher {
        unreadable: &'static str,
    }

    impl ContentHasher for UnreadableHasher {
        fn hash(&self, path: &Path) -> std::io::Result<String> {
            if path.file_name().is_some_and(|n| n == self.unreadable) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "unreadable",
                ));
            }
            Blake3Hasher.hash(path)
        }
    }

    fn jan_15() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        source: PathBuf,
        out: PathBuf,
        db: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let source = dir.path().join("inbox");
            let out = dir.path().join("out");
            fs::create_dir_all(&source).unwrap();
            let db = dir.path().join("journal.db");
            Self {
                _dir: dir,
                source,
                out,
                db,
            }
        }

        fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
            let path = self.source.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, bytes).unwrap();
            path
        }

        fn config(&self) -> OrganizeConfig {
            let mut type_destinations = HashMap::new();
            type_destinations.insert(MediaType::Image, self.out.clone());
            type_destinations.insert(MediaType::Video, self.out.clone());
            type_destinations.insert(MediaType::Audio, self.out.clone());
            OrganizeConfig {
                source: self.source.clone(),
                db_path: self.db.clone(),
                layout: LayoutConfig {
                    destination: None,
                    type_destinations,
                    extension_destinations: HashMap::new(),
                    duplicates_dir: PathBuf::from("duplicates"),
                    space_replacement: "_".to_string(),
                    scheme: OrganizationScheme::ExtensionFirst,
                    no_original_name: true,
                },
                jobs: 1,
                dry_run: false,
                copy_files: false,
                delete_empty_dirs: false,
                resume: false,
                no_progress_bar: true,
            }
        }

        fn day_dir(&self) -> PathBuf {
            self.out.join("jpg/2024/2024-01/2024-01-15")
        }

        fn dup_dir(&self) -> PathBuf {
            self.out.join("jpg/duplicates/2024/2024-01/2024-01-15")
        }

        async fn run_with(
            &self,
            config: OrganizeConfig,
            dimension: Option<u32>,
        ) -> (RunSummary, Arc<SqliteJournal>) {
            self.run_hashed(config, dimension, Arc::new(Blake3Hasher)).await
        }

        async fn run_hashed(
            &self,
            config: OrganizeConfig,
            dimension: Option<u32>,
            hasher: Arc<dyn ContentHasher>,
        ) -> (RunSummary, Arc<SqliteJournal>) {
            let journal = Arc::new(SqliteJournal::open(&self.db).await.unwrap());
            let extractor = Arc::new(StubExtractor {
                created: jan_15(),
                dimension,
            });
            let organizer = Organizer::new(config, journal.clone(), extractor, hasher);
            let summary = organizer.run(CancellationToken::new()).await.unwrap();
            (summary, journal)
        }

        async fn run(&self, config: OrganizeConfig) -> RunSummary {
            self.run_with(config, None).await.0
        }
    }

    fn files_under(root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
            .collect();
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_duplicate_goes_to_duplicates_and_group_is_sequenced() {
        let fx = Fixture::new();
        fx.write("a.jpg", b"same bytes");
        fx.write("b.jpg", b"same bytes");

        let summary = fx.run(fx.config()).await;

        assert!(fx.day_dir().join("20240115-103000_001.jpg").exists());
        assert!(fx.dup_dir().join("20240115-103000_002.jpg").exists());
        assert!(!fx.day_dir().join("20240115-103000.jpg").exists());
        assert_eq!(files_under(&fx.out).len(), 2);
        assert!(files_under(&fx.source).is_empty());

        assert_eq!(summary.total, 2);
        assert_eq!(summary.organized, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.errors, 0);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn test_same_timestamp_distinct_content_all_suffixed() {
        let fx = Fixture::new();
        fx.write("a.jpg", b"one");
        fx.write("b.jpg", b"two!");
        fx.write("c.jpg", b"three");

        let summary = fx.run(fx.config()).await;

        assert_eq!(
            files_under(&fx.day_dir()),
            vec![
                PathBuf::from("20240115-103000_001.jpg"),
                PathBuf::from("20240115-103000_002.jpg"),
                PathBuf::from("20240115-103000_003.jpg"),
            ]
        );
        assert_eq!(summary.duplicates, 0);
        assert_eq!(summary.organized, 3);
    }

    #[tokio::test]
    async fn test_original_name_and_dimension_in_file_name() {
        let fx = Fixture::new();
        fx.write("IMG_1.jpg", b"pixels");
        let mut config = fx.config();
        config.layout.no_original_name = false;

        fx.run_with(config, Some(4000)).await;

        assert!(fx.day_dir().join("20240115-103000_4000 (IMG_1).jpg").exists());
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let fx = Fixture::new();
        let src = fx.write("a.jpg", b"a");
        let mut config = fx.config();
        config.dry_run = true;

        let (summary, journal) = fx.run_with(config, None).await;

        assert!(src.exists());
        assert!(!fx.out.exists());
        assert_eq!(summary.organized, 1);
        let stats = journal.stats().await.unwrap();
        assert_eq!(stats.dry_run, 1);
        assert_eq!(stats.completed, 0);
    }

    #[tokio::test]
    async fn test_copy_mode_keeps_source_and_mtime() {
        let fx = Fixture::new();
        let src = fx.write("a.jpg", b"copy me");
        let old = std::time::SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        fs::File::options()
            .write(true)
            .open(&src)
            .unwrap()
            .set_modified(old)
            .unwrap();
        let mut config = fx.config();
        config.copy_files = true;

        fx.run(config).await;

        let dest = fx.day_dir().join("20240115-103000.jpg");
        assert!(src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"copy me");
        assert_eq!(fs::metadata(&dest).unwrap().modified().unwrap(), old);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let fx = Fixture::new();
        fx.write("a.jpg", b"a");
        fx.write("b.mp4", b"video");
        let mut config = fx.config();
        config.copy_files = true;

        let first = fx.run(config.clone()).await;
        assert_eq!(first.organized, 2);
        let after_first = files_under(&fx.out);

        config.resume = true;
        let second = fx.run(config).await;
        assert_eq!(files_under(&fx.out), after_first);
        assert_eq!(second.already_done, 2);
        assert_eq!(second.total, 2);
        assert_eq!(second.duplicates, 0);
    }

    #[tokio::test]
    async fn test_fresh_journal_dedups_against_destination() {
        let fx = Fixture::new();
        fx.write("a.jpg", b"already organized");
        let mut config = fx.config();
        config.copy_files = true;
        fx.run(config.clone()).await;

        // Forget the first run; the copy in the destination is all that is left
        fs::remove_file(&fx.db).unwrap();
        let _ = fs::remove_file(fx.db.with_extension("db-wal"));
        let _ = fs::remove_file(fx.db.with_extension("db-shm"));

        let (summary, _) = fx.run_with(config, None).await;
        assert_eq!(summary.indexed, 1);
        assert_eq!(summary.duplicates, 1);
        assert!(fx.day_dir().join("20240115-103000.jpg").exists());
        assert!(fx.dup_dir().join("20240115-103000.jpg").exists());
    }

    #[tokio::test]
    async fn test_resume_requeues_assigned_and_failed_records() {
        let fx = Fixture::new();
        let pending = fx.write("pending.jpg", b"p");
        let failed = fx.write("failed.jpg", b"ff");
        let vanished = fx.source.join("vanished.jpg");
        let clash = fx.write("clash.jpg", b"ccc");
        let landed_dest = fx.out.join("landed.jpg");
        let occupied = fx.out.join("c.jpg");
        fs::create_dir_all(&fx.out).unwrap();
        fs::write(&landed_dest, b"landed").unwrap();
        fs::write(&occupied, b"occupied").unwrap();

        {
            let journal = SqliteJournal::open(&fx.db).await.unwrap();
            let extractor = StubExtractor {
                created: jan_15(),
                dimension: None,
            };
            for (path, dest, status) in [
                (&pending, fx.out.join("p.jpg"), RecordStatus::Pending),
                (&failed, fx.out.join("f.jpg"), RecordStatus::Failed),
                (&clash, occupied.clone(), RecordStatus::Pending),
            ] {
                let record = MediaRecord::new_pending(&extractor.extract(path).unwrap());
                let id = journal.insert(&record).await.unwrap();
                journal.update_destination(id, &dest, 0, false).await.unwrap();
                journal.update_status(id, status, Some("boom")).await.unwrap();
            }
            let stale = [
                ("landed.jpg", landed_dest.clone()),
                ("vanished.jpg", fx.out.join("v.jpg")),
            ];
            for (name, dest) in stale {
                let mut record = MediaRecord::new_pending(&extractor.extract(&pending).unwrap());
                record.source_path = fx.source.join(name);
                let id = journal.insert(&record).await.unwrap();
                journal.update_destination(id, &dest, 0, false).await.unwrap();
            }
        }

        let mut config = fx.config();
        config.resume = true;
        let (summary, journal) = fx.run_with(config, None).await;

        assert_eq!(summary.requeued, 3);
        assert!(fx.out.join("p.jpg").exists());
        assert!(fx.out.join("f.jpg").exists());
        assert!(!pending.exists() && !failed.exists() && !vanished.exists());

        // An occupied destination is a collision, never an overwrite
        assert!(clash.exists());
        assert_eq!(fs::read(&occupied).unwrap(), b"occupied");

        let stats = journal.stats().await.unwrap();
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.failed, 2);
        let failures = journal.failed_records().await.unwrap();
        let error_of = |path: &Path| {
            failures
                .iter()
                .find(|r| r.source_path == path)
                .and_then(|r| r.last_error.clone())
                .unwrap()
        };
        assert_eq!(error_of(&vanished), "source file no longer exists");
        assert!(error_of(&clash).starts_with("Destination already exists"));
    }

    #[tokio::test]
    async fn test_hash_failure_still_organizes() {
        let fx = Fixture::new();
        fx.write("a.jpg", b"same bytes");
        let b = fx.write("b.jpg", b"same bytes");

        let (summary, journal) = fx
            .run_hashed(
                fx.config(),
                None,
                Arc::new(UnreadableHasher { unreadable: "b.jpg" }),
            )
            .await;

        assert_eq!(summary.organized, 2);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.duplicates, 0);
        assert!(!b.exists());
        assert_eq!(journal.find_unhashed_by_size(10).await.unwrap().len(), 2);
        assert_eq!(
            files_under(&fx.day_dir()),
            vec![
                PathBuf::from("20240115-103000_001.jpg"),
                PathBuf::from("20240115-103000_002.jpg"),
            ]
        );
    }

    #[tokio::test]
    async fn test_later_run_sequences_completed_sibling() {
        let fx = Fixture::new();
        fx.write("a.jpg", b"a");
        let mut config = fx.config();
        fx.run(config.clone()).await;
        assert!(fx.day_dir().join("20240115-103000.jpg").exists());

        fx.write("b.jpg", b"bb");
        config.resume = true;
        let summary = fx.run(config).await;

        assert_eq!(summary.organized, 2);
        assert_eq!(
            files_under(&fx.day_dir()),
            vec![
                PathBuf::from("20240115-103000_001.jpg"),
                PathBuf::from("20240115-103000_002.jpg"),
            ]
        );
    }

    #[tokio::test]
    async fn test_backfill_hashes_moved_file_from_destination() {
        let fx = Fixture::new();
        fx.write("a.jpg", b"same content");
        let mut config = fx.config();
        fx.run(config.clone()).await;
        let moved = fx.day_dir().join("20240115-103000.jpg");
        assert!(moved.exists());

        // New destination root: the earlier copy is known only through the journal
        let archive = fx.out.with_file_name("archive");
        for dir in config.layout.type_destinations.values_mut() {
            *dir = archive.clone();
        }
        config.resume = true;
        fx.write("c.jpeg", b"same content");
        let (summary, journal) = fx.run_with(config, None).await;

        assert_eq!(summary.indexed, 0);
        assert_eq!(summary.duplicates, 1);
        assert!(archive
            .join("jpeg/duplicates/2024/2024-01/2024-01-15/20240115-103000.jpeg")
            .exists());
        let originals = journal.find_unhashed_by_size(12).await.unwrap();
        assert!(originals.is_empty());
        assert!(moved.exists());
    }

    #[tokio::test]
    async fn test_delete_empty_dirs_after_move() {
        let fx = Fixture::new();
        fx.write("trip/day1/a.jpg", b"a");
        let mut config = fx.config();
        config.delete_empty_dirs = true;

        fx.run(config).await;

        assert!(!fx.source.join("trip").exists());
        assert!(fx.source.exists());
        assert!(fx.day_dir().join("20240115-103000.jpg").exists());
    }

    #[tokio::test]
    async fn test_empty_dirs_kept_in_copy_mode() {
        let fx = Fixture::new();
        fx.write("trip/a.jpg", b"a");
        fs::create_dir_all(fx.source.join("empty")).unwrap();
        let mut config = fx.config();
        config.delete_empty_dirs = true;
        config.copy_files = true;

        fx.run(config).await;

        assert!(fx.source.join("empty").exists());
    }

    #[tokio::test]
    async fn test_unsupported_and_destination_inside_source_skipped() {
        let fx = Fixture::new();
        fx.write("a.jpg", b"a");
        fx.write("notes.txt", b"n");
        let mut config = fx.config();
        let nested_out = fx.source.join("sorted");
        for dir in config.layout.type_destinations.values_mut() {
            *dir = nested_out.clone();
        }

        let first = fx.run(config.clone()).await;
        assert_eq!(first.organized, 1);
        assert!(nested_out
            .join("jpg/2024/2024-01/2024-01-15/20240115-103000.jpg")
            .exists());

        // The organized copy inside the source is neither re-walked nor moved
        config.resume = true;
        let second = fx.run(config).await;
        assert_eq!(second.total, 1);
        assert!(fx.source.join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_cancellation() {
        let fx = Fixture::new();
        fx.write("a.jpg", b"a");
        let journal = Arc::new(SqliteJournal::open(&fx.db).await.unwrap());
        let organizer = Organizer::new(
            fx.config(),
            journal,
            Arc::new(StubExtractor {
                created: jan_15(),
                dimension: None,
            }),
            Arc::new(Blake3Hasher),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = organizer.run(cancel).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.organized, 0);
        assert!(fx.source.join("a.jpg").exists());
    }

    #[test]
    fn test_journal_files() {
        assert_eq!(
            journal_files(Path::new("/src/.media-organizer.db")),
            vec![
                PathBuf::from("/src/.media-organizer.db"),
                PathBuf::from("/src/.media-organizer.db-wal"),
                PathBuf::from("/src/.media-organizer.db-shm"),
            ]
        );
    }
}
