use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::cli::{OrganizeArgs, StatusArgs};
use crate::media::MediaType;
use crate::types::{LogLevel, OrganizationScheme};

/// File name of the journal placed in the source directory by default.
pub const DEFAULT_DB_NAME: &str = ".media-organizer.db";

const DEFAULT_JOBS: usize = 4;
const DEFAULT_DUPLICATES_DIR: &str = "duplicates";
const DEFAULT_SPACE_REPLACEMENT: &str = "_";

fn default_type_dir(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Image => "./output/images",
        MediaType::Video => "./output/videos",
        MediaType::Audio => "./output/audio",
    }
}

/// Application configuration after merging CLI flags, the optional config
/// file and defaults (in that order of precedence).
#[derive(Debug)]
pub struct Config {
    pub source: PathBuf,
    pub db_path: PathBuf,
    pub log_file: Option<PathBuf>,
    pub layout: LayoutConfig,

    pub jobs: usize,

    pub log_level: LogLevel,

    pub dry_run: bool,
    pub copy_files: bool,
    pub delete_empty_dirs: bool,
    pub fresh: bool,
    pub no_progress_bar: bool,
}

/// Subset of the configuration consumed by the path assigner.
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    /// Unified destination. Only `date_first` reads it in practice, since the
    /// per-type destinations always carry a default.
    pub destination: Option<PathBuf>,
    pub type_destinations: HashMap<MediaType, PathBuf>,
    /// Keyed by lowercase extension without the dot.
    pub extension_destinations: HashMap<String, PathBuf>,
    /// Absolute: used as is. Relative: nested under each destination.
    pub duplicates_dir: PathBuf,
    pub space_replacement: String,
    pub scheme: OrganizationScheme,
    pub no_original_name: bool,
}

impl LayoutConfig {
    /// Base directory for a media type under the configured scheme.
    pub fn base_dir(&self, media_type: MediaType) -> &Path {
        let per_type = self.type_destinations.get(&media_type);
        let chosen = match self.scheme {
            OrganizationScheme::DateFirst => self.destination.as_ref().or(per_type),
            OrganizationScheme::ExtensionFirst => per_type.or(self.destination.as_ref()),
        };
        chosen.map(PathBuf::as_path).unwrap_or_else(|| Path::new("."))
    }

    /// Every directory organized files may end up in, for destination indexing.
    pub fn destination_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = Vec::new();
        roots.extend(self.destination.iter().cloned());
        roots.extend(self.type_destinations.values().cloned());
        roots.extend(self.extension_destinations.values().cloned());
        if self.duplicates_dir.is_absolute() {
            roots.push(self.duplicates_dir.clone());
        }
        roots
    }
}

/// Subset of the configuration consumed by the organize pipeline.
#[derive(Debug, Clone)]
pub struct OrganizeConfig {
    pub source: PathBuf,
    pub db_path: PathBuf,
    pub layout: LayoutConfig,
    pub jobs: usize,
    pub dry_run: bool,
    pub copy_files: bool,
    pub delete_empty_dirs: bool,
    /// Continue from an existing journal instead of a fresh one.
    pub resume: bool,
    pub no_progress_bar: bool,
}

/// On-disk JSON configuration. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub source: Option<String>,
    pub destination: Option<String>,
    /// Keyed by media type name: `image`, `video`, `audio`.
    pub destinations: HashMap<String, String>,
    pub extension_destinations: HashMap<String, String>,
    pub organization_scheme: Option<OrganizationScheme>,
    pub dry_run: Option<bool>,
    pub verbose: Option<bool>,
    pub copy_files: Option<bool>,
    pub concurrent_jobs: Option<usize>,
    pub delete_empty_dirs: Option<bool>,
    pub duplicates_dir: Option<String>,
    pub space_replacement: Option<String>,
    pub no_original_name: Option<bool>,
    pub log_file: Option<String>,
    pub db_path: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Reading config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Parsing config file {}", path.display()))
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Tilde-expand and make absolute against the current directory.
fn resolve_path(path: &str) -> anyhow::Result<PathBuf> {
    let expanded = expand_tilde(path);
    std::path::absolute(&expanded).with_context(|| format!("Resolving path {}", path))
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Parse an `EXT=DIR` extension override.
fn parse_extension_override(value: &str) -> anyhow::Result<(String, String)> {
    let Some((ext, dir)) = value.split_once('=') else {
        bail!("Invalid extension destination '{}', expected EXT=DIR", value);
    };
    let ext = normalize_extension(ext);
    if ext.is_empty() || dir.trim().is_empty() {
        bail!("Invalid extension destination '{}', expected EXT=DIR", value);
    }
    Ok((ext, dir.trim().to_string()))
}

impl Config {
    pub fn from_cli(args: OrganizeArgs) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }

    fn merge(args: OrganizeArgs, file: FileConfig) -> anyhow::Result<Self> {
        let Some(source) = args.source.or(file.source) else {
            bail!("Source directory is required (--source)");
        };
        let source = resolve_path(&source)?;
        if !source.is_dir() {
            bail!("Source directory does not exist: {}", source.display());
        }

        let destination = args
            .dest
            .or(file.destination)
            .map(|d| resolve_path(&d))
            .transpose()?;

        let mut type_destinations = HashMap::new();
        for media_type in [MediaType::Image, MediaType::Video, MediaType::Audio] {
            let default = default_type_dir(media_type).to_string();
            let dir = match file.destinations.get(media_type.as_str()) {
                Some(dir) => dir.clone(),
                None => default,
            };
            type_destinations.insert(media_type, resolve_path(&dir)?);
        }
        for key in file.destinations.keys() {
            if MediaType::from_str(key).is_none() {
                bail!("Unknown media type '{}' in destinations", key);
            }
        }
        let cli_type_dirs = [
            (MediaType::Image, args.image_dest),
            (MediaType::Video, args.video_dest),
            (MediaType::Audio, args.audio_dest),
        ];
        for (media_type, dir) in cli_type_dirs {
            if let Some(dir) = dir {
                type_destinations.insert(media_type, resolve_path(&dir)?);
            }
        }

        let mut extension_destinations = HashMap::new();
        for (ext, dir) in &file.extension_destinations {
            extension_destinations.insert(normalize_extension(ext), resolve_path(dir)?);
        }
        for value in &args.ext_dest {
            let (ext, dir) = parse_extension_override(value)?;
            extension_destinations.insert(ext, resolve_path(&dir)?);
        }

        let duplicates_dir = args
            .duplicates_dir
            .or(file.duplicates_dir)
            .filter(|d| !d.trim().is_empty())
            .map(|d| expand_tilde(&d))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DUPLICATES_DIR));

        let jobs = args
            .jobs
            .or(file.concurrent_jobs)
            .unwrap_or(DEFAULT_JOBS);
        if jobs == 0 {
            bail!("--jobs must be at least 1");
        }

        let db_path = match args.db.or(file.db_path) {
            Some(db) => resolve_path(&db)?,
            None => source.join(DEFAULT_DB_NAME),
        };

        let log_file = args
            .log_file
            .or(file.log_file)
            .filter(|f| !f.is_empty())
            .map(|f| resolve_path(&f))
            .transpose()?;

        let verbose = args.verbose || file.verbose.unwrap_or(false);
        let log_level = args.log_level.unwrap_or(if verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        });

        Ok(Self {
            source,
            db_path,
            log_file,
            layout: LayoutConfig {
                destination,
                type_destinations,
                extension_destinations,
                duplicates_dir,
                space_replacement: args
                    .space_replacement
                    .or(file.space_replacement)
                    .unwrap_or_else(|| DEFAULT_SPACE_REPLACEMENT.to_string()),
                scheme: args
                    .scheme
                    .or(file.organization_scheme)
                    .unwrap_or_default(),
                no_original_name: args.no_original_name || file.no_original_name.unwrap_or(false),
            },
            jobs,
            log_level,
            dry_run: args.dry_run || file.dry_run.unwrap_or(false),
            copy_files: args.copy || file.copy_files.unwrap_or(false),
            delete_empty_dirs: args.delete_empty_dirs || file.delete_empty_dirs.unwrap_or(false),
            fresh: args.fresh,
            no_progress_bar: args.no_progress_bar,
        })
    }

    /// Pipeline view of the configuration. `resume` is decided by the caller
    /// once it knows whether a journal already exists.
    pub fn organize_config(&self, resume: bool) -> OrganizeConfig {
        OrganizeConfig {
            source: self.source.clone(),
            db_path: self.db_path.clone(),
            layout: self.layout.clone(),
            jobs: self.jobs,
            dry_run: self.dry_run,
            copy_files: self.copy_files,
            delete_empty_dirs: self.delete_empty_dirs,
            resume,
            no_progress_bar: self.no_progress_bar,
        }
    }
}

/// Journal path for the `status` command.
pub fn status_db_path(args: &StatusArgs) -> anyhow::Result<PathBuf> {
    if let Some(db) = &args.db {
        return resolve_path(db);
    }
    if let Some(source) = &args.source {
        return Ok(resolve_path(source)?.join(DEFAULT_DB_NAME));
    }
    bail!("Either --source or --db is required")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_for(source: &Path) -> OrganizeArgs {
        OrganizeArgs {
            source: Some(source.to_string_lossy().into_owned()),
            ..OrganizeArgs::default()
        }
    }

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Pictures");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Pictures"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(expand_tilde("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_tilde("relative/path"), PathBuf::from("relative/path"));
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::merge(args_for(dir.path()), FileConfig::default()).unwrap();
        assert_eq!(cfg.jobs, 4);
        assert_eq!(cfg.layout.scheme, OrganizationScheme::ExtensionFirst);
        assert_eq!(cfg.layout.duplicates_dir, PathBuf::from("duplicates"));
        assert_eq!(cfg.layout.space_replacement, "_");
        assert_eq!(cfg.db_path, dir.path().join(DEFAULT_DB_NAME));
        assert_eq!(cfg.log_level, LogLevel::Info);
        assert!(cfg.layout.destination.is_none());
        assert!(cfg.layout.type_destinations[&MediaType::Image].ends_with("output/images"));
        assert!(cfg.layout.type_destinations[&MediaType::Audio].is_absolute());
        assert!(!cfg.dry_run && !cfg.copy_files && !cfg.delete_empty_dirs);
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let err = Config::merge(OrganizeArgs::default(), FileConfig::default()).unwrap_err();
        assert!(err.to_string().contains("required"));

        let dir = tempfile::tempdir().unwrap();
        let err = Config::merge(args_for(&dir.path().join("nope")), FileConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_zero_jobs_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args_for(dir.path());
        args.jobs = Some(0);
        assert!(Config::merge(args, FileConfig::default()).is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let file: FileConfig = serde_json::from_str(
            r#"{
                "destination": "/file/out",
                "destinations": {"image": "/file/images"},
                "extension_destinations": {".NEF": "/file/raw"},
                "organization_scheme": "date_first",
                "concurrent_jobs": 2,
                "copy_files": true,
                "verbose": true,
                "space_replacement": "-"
            }"#,
        )
        .unwrap();

        let mut args = args_for(dir.path());
        args.jobs = Some(9);
        args.image_dest = Some("/cli/images".to_string());
        args.ext_dest = vec!["dng=/cli/raw".to_string()];
        args.scheme = Some(OrganizationScheme::ExtensionFirst);

        let cfg = Config::merge(args, file).unwrap();
        assert_eq!(cfg.jobs, 9);
        assert_eq!(cfg.layout.scheme, OrganizationScheme::ExtensionFirst);
        assert_eq!(cfg.layout.destination, Some(PathBuf::from("/file/out")));
        assert_eq!(
            cfg.layout.type_destinations[&MediaType::Image],
            PathBuf::from("/cli/images")
        );
        assert_eq!(
            cfg.layout.extension_destinations["nef"],
            PathBuf::from("/file/raw")
        );
        assert_eq!(
            cfg.layout.extension_destinations["dng"],
            PathBuf::from("/cli/raw")
        );
        assert_eq!(cfg.layout.space_replacement, "-");
        assert!(cfg.copy_files);
        assert_eq!(cfg.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_unknown_file_keys_rejected() {
        assert!(serde_json::from_str::<FileConfig>(r#"{"sauce": "/x"}"#).is_err());
    }

    #[test]
    fn test_unknown_media_type_in_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let file: FileConfig =
            serde_json::from_str(r#"{"destinations": {"document": "/docs"}}"#).unwrap();
        assert!(Config::merge(args_for(dir.path()), file).is_err());
    }

    #[test]
    fn test_parse_extension_override() {
        assert_eq!(
            parse_extension_override(".JPG=/photos/jpg").unwrap(),
            ("jpg".to_string(), "/photos/jpg".to_string())
        );
        assert!(parse_extension_override("jpg").is_err());
        assert!(parse_extension_override("=/x").is_err());
        assert!(parse_extension_override("jpg=").is_err());
    }

    #[test]
    fn test_absolute_duplicates_dir_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args_for(dir.path());
        args.duplicates_dir = Some("/dupes".to_string());
        let cfg = Config::merge(args, FileConfig::default()).unwrap();
        assert_eq!(cfg.layout.duplicates_dir, PathBuf::from("/dupes"));
        assert!(cfg.layout.destination_roots().contains(&PathBuf::from("/dupes")));
    }

    #[test]
    fn test_base_dir_by_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args_for(dir.path());
        args.dest = Some("/unified".to_string());
        let mut cfg = Config::merge(args, FileConfig::default()).unwrap();

        for media_type in [MediaType::Image, MediaType::Video, MediaType::Audio] {
            assert_ne!(cfg.layout.base_dir(media_type), Path::new("/unified"));
        }
        assert!(cfg.layout.base_dir(MediaType::Video).ends_with("output/videos"));
        cfg.layout.scheme = OrganizationScheme::DateFirst;
        assert_eq!(cfg.layout.base_dir(MediaType::Video), Path::new("/unified"));
    }

    #[test]
    fn test_status_db_path() {
        let by_db = StatusArgs {
            source: None,
            db: Some("/tmp/j.db".to_string()),
            failed: false,
        };
        assert_eq!(status_db_path(&by_db).unwrap(), PathBuf::from("/tmp/j.db"));

        let by_source = StatusArgs {
            source: Some("/photos".to_string()),
            db: None,
            failed: false,
        };
        assert_eq!(
            status_db_path(&by_source).unwrap(),
            PathBuf::from("/photos").join(DEFAULT_DB_NAME)
        );

        let neither = StatusArgs {
            source: None,
            db: None,
            failed: true,
        };
        assert!(status_db_path(&neither).is_err());
    }
}
