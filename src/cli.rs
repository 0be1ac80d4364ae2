use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::types::*;

#[derive(Parser, Debug)]
#[command(
    name = "media-organizer",
    version,
    about = "Organize photos, videos and audio into a date-based tree",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub organize: OrganizeArgs,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the journal state of a previous or running organize
    Status(StatusArgs),
}

/// Flags for an organize run. Options left unset fall back to the
/// `--config` file, then to built-in defaults.
#[derive(Args, Debug, Default)]
pub struct OrganizeArgs {
    /// Source directory to scan for media files
    #[arg(short, long)]
    pub source: Option<String>,

    /// Unified destination directory (used by date_first only; extension_first
    /// uses the per-type destinations)
    #[arg(long)]
    pub dest: Option<String>,

    /// Destination directory for images [default: ./output/images]
    #[arg(long)]
    pub image_dest: Option<String>,

    /// Destination directory for videos [default: ./output/videos]
    #[arg(long)]
    pub video_dest: Option<String>,

    /// Destination directory for audio files [default: ./output/audio]
    #[arg(long)]
    pub audio_dest: Option<String>,

    /// Per-extension destination override, e.g. `--ext-dest raw=/photos/raw`
    #[arg(long = "ext-dest", value_name = "EXT=DIR")]
    pub ext_dest: Vec<String>,

    /// Organization scheme [default: extension_first]
    #[arg(long, value_enum)]
    pub scheme: Option<OrganizationScheme>,

    /// Simulate the run without touching any file
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// Copy files instead of moving them
    #[arg(short, long)]
    pub copy: bool,

    /// Number of concurrent extract/transfer workers [default: 4]
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Delete empty folders in the source directory after moving files
    #[arg(long)]
    pub delete_empty_dirs: bool,

    /// Where duplicates go: absolute path, or a folder name placed under
    /// each destination [default: duplicates]
    #[arg(long)]
    pub duplicates_dir: Option<String>,

    /// Replacement for spaces in original names; empty disables [default: _]
    #[arg(long)]
    pub space_replacement: Option<String>,

    /// Do not append the original file name
    #[arg(long)]
    pub no_original_name: bool,

    /// Journal database path [default: <source>/.media-organizer.db]
    #[arg(long)]
    pub db: Option<String>,

    /// Discard any existing journal and start over
    #[arg(long)]
    pub fresh: bool,

    /// JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Shorthand for --log-level debug
    #[arg(short, long)]
    pub verbose: bool,

    /// Also append logs to this file
    #[arg(short = 'l', long)]
    pub log_file: Option<String>,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Source directory whose default journal should be read
    #[arg(short, long, conflicts_with = "db")]
    pub source: Option<String>,

    /// Journal database path
    #[arg(long)]
    pub db: Option<String>,

    /// List failed files with their errors
    #[arg(long)]
    pub failed: bool,
}
