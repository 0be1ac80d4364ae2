//! media-organizer: sort photos, videos and audio into a date-structured tree.
//!
//! Every discovered file is journaled in SQLite before anything moves, so a
//! run can be interrupted and resumed, and identical content is detected
//! across runs through size-gated lazy hashing.

#![warn(clippy::all)]

mod cli;
mod config;
mod journal;
mod media;
mod organize;
mod shutdown;
mod types;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::Config;
use journal::{Journal, SqliteJournal};
use media::{Blake3Hasher, FileMetadataExtractor};
use organize::{Organizer, RunSummary};
use types::LogLevel;

/// Console logging plus an optional non-ANSI copy appended to `log_file`.
/// `RUST_LOG` takes precedence over `level`.
fn init_tracing(level: LogLevel, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Creating log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Opening log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Run the status command.
async fn run_status(args: cli::StatusArgs) -> anyhow::Result<()> {
    let db_path = config::status_db_path(&args)?;

    if !db_path.exists() {
        println!("No journal found at {}", db_path.display());
        println!("Run an organize pass first to create it.");
        return Ok(());
    }

    let journal = SqliteJournal::open(&db_path)
        .await
        .with_context(|| format!("Opening journal {}", db_path.display()))?;
    let stats = journal.stats().await?;
    let duplicates = journal.duplicate_count().await?;

    println!("Journal: {}", journal.path().display());
    println!();
    println!("Files:");
    println!("  Total:      {}", stats.total());
    println!("  Completed:  {}", stats.completed);
    println!("  Dry run:    {}", stats.dry_run);
    println!("  Pending:    {}", stats.pending);
    println!("  Failed:     {}", stats.failed);
    println!("  Duplicates: {}", duplicates);

    if args.failed && stats.failed > 0 {
        println!();
        println!("Failed files:");
        for record in journal.failed_records().await? {
            println!(
                "  {}: {}",
                record.source_path.display(),
                record.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

/// Delete the journal and its WAL/SHM companions. Missing files are fine.
fn remove_journal(db_path: &Path) -> anyhow::Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(suffix);
        match std::fs::remove_file(&name) {
            Ok(()) => tracing::debug!("Removed {}", Path::new(&name).display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Removing {}", Path::new(&name).display()));
            }
        }
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, config: &Config) {
    let mode = if config.dry_run {
        "dry run"
    } else if config.copy_files {
        "copy"
    } else {
        "move"
    };
    println!();
    println!("Organize summary ({mode}):");
    println!("  Total:         {}", summary.total);
    println!("  Organized:     {}", summary.organized);
    println!("  Duplicates:    {}", summary.duplicates);
    println!("  Errors:        {}", summary.errors);
    if summary.pending > 0 {
        println!("  Pending:       {}", summary.pending);
    }
    if summary.skipped > 0 {
        println!("  Unreadable:    {}", summary.skipped);
    }
    if summary.already_done > 0 {
        println!("  Already done:  {}", summary.already_done);
    }
    if summary.requeued > 0 {
        println!("  Resumed:       {}", summary.requeued);
    }
    println!("  Elapsed:       {:.1}s", summary.elapsed.as_secs_f64());
    println!("  Journal:       {}", config.db_path.display());

    if summary.cancelled {
        println!();
        println!("Interrupted. Re-run the same command to resume from the journal.");
    } else if summary.errors > 0 {
        println!();
        println!("Some files failed; re-running retries them. See `media-organizer status --failed`.");
    }
}

async fn run_organize(config: Config) -> anyhow::Result<()> {
    if config.fresh {
        tracing::info!("Starting fresh, removing {}", config.db_path.display());
        remove_journal(&config.db_path)?;
    }
    let resume = config.db_path.exists();

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Creating journal directory {}", parent.display()))?;
    }
    let journal = SqliteJournal::open(&config.db_path)
        .await
        .with_context(|| format!("Opening journal {}", config.db_path.display()))?;

    tracing::info!(
        source = %config.source.display(),
        scheme = config.layout.scheme.as_str(),
        jobs = config.jobs,
        dry_run = config.dry_run,
        copy = config.copy_files,
        "Organizing"
    );
    if config.dry_run {
        tracing::info!("Dry run: no files will be moved or copied");
    }

    let shutdown_token =
        shutdown::install_signal_handler().context("Installing signal handlers")?;
    let organizer = Organizer::new(
        config.organize_config(resume),
        Arc::new(journal),
        Arc::new(FileMetadataExtractor::default()),
        Arc::new(Blake3Hasher),
    );
    let summary = organizer.run(shutdown_token).await?;
    print_summary(&summary, &config);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    if let Some(Command::Status(args)) = cli.command {
        init_tracing(LogLevel::Warn, None)?;
        return run_status(args).await;
    }

    let config = Config::from_cli(cli.organize)?;
    init_tracing(config.log_level, config.log_file.as_deref())?;
    run_organize(config).await
}
