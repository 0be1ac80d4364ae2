//! Run-wide progress counters and the terminal progress bar that samples them.

use std::io::IsTerminal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

/// Counters shared by all pipeline stages.
///
/// Stages only increment; the reporter only reads. Values are advisory and
/// the final summary is taken from the journal instead.
#[derive(Debug, Default)]
pub struct Progress {
    discovered: AtomicU64,
    processed: AtomicU64,
    transferred: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub discovered: u64,
    pub processed: u64,
    pub transferred: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl Progress {
    pub fn add_discovered(&self, n: u64) {
        self.discovered.fetch_add(n, Ordering::Relaxed);
    }

    /// A file left the pipeline, whatever the outcome.
    pub fn inc_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_transferred(&self) {
        self.transferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A file never reached the journal (unreadable or unsupported).
    pub fn inc_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            discovered: self.discovered.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            transferred: self.transferred.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Create a progress bar with a consistent template.
///
/// Hidden when the user passed `--no-progress-bar` or stdout is not a TTY.
pub fn create_progress_bar(no_progress_bar: bool) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

/// Redraw `pb` from the counters until `done` is cancelled.
pub fn spawn_reporter(
    progress: Arc<Progress>,
    pb: ProgressBar,
    done: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(200));
        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = interval.tick() => {}
            }
            render(&progress.snapshot(), &pb);
        }
        render(&progress.snapshot(), &pb);
        pb.finish_and_clear();
    })
}

fn render(snap: &ProgressSnapshot, pb: &ProgressBar) {
    pb.set_length(snap.discovered);
    pb.set_position(snap.processed);
    pb.set_message(format!(
        "{} organized, {} failed, {} skipped",
        snap.transferred, snap.failed, snap.skipped
    ));
}
