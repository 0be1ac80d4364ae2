use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use serde::Deserialize;
use thiserror::Error;

use super::{extension_of, MediaType};

/// Errors that make a file unusable for organizing.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file type: {0}")]
    Unsupported(PathBuf),

    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Everything the organize stage needs to know about a discovered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub source_path: PathBuf,
    pub original_name: String,
    /// Lowercased, without the leading dot.
    pub extension: String,
    pub size_bytes: u64,
    /// Capture time from embedded metadata, else the file's modification time.
    pub created: NaiveDateTime,
    /// Larger of width/height, images only.
    pub larger_dimension: Option<u32>,
    pub media_type: MediaType,
}

/// Turns a path into a [`MediaFile`].
///
/// Implementations run on blocking threads and may do synchronous I/O.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<MediaFile, ExtractError>;
}

/// Default extractor: EXIF + image header for images, `ffprobe` container tags
/// for video and audio, modification time as the fallback for everything.
#[derive(Debug, Clone)]
pub struct FileMetadataExtractor {
    ffprobe: PathBuf,
}

impl Default for FileMetadataExtractor {
    fn default() -> Self {
        Self {
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl MetadataExtractor for FileMetadataExtractor {
    fn extract(&self, path: &Path) -> Result<MediaFile, ExtractError> {
        let media_type =
            MediaType::from_path(path).ok_or_else(|| ExtractError::Unsupported(path.to_path_buf()))?;
        let meta = std::fs::metadata(path).map_err(|e| ExtractError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut larger_dimension = None;
        let embedded = match media_type {
            MediaType::Image => {
                larger_dimension = image_larger_dimension(path);
                match super::exif::read_capture_time(path) {
                    Ok(found) => found,
                    Err(e) => {
                        tracing::debug!("EXIF read failed for {}: {:#}", path.display(), e);
                        None
                    }
                }
            }
            MediaType::Video | MediaType::Audio => self.probe_creation_time(path),
        };

        let created = match embedded {
            Some(created) => created,
            None => {
                tracing::debug!(
                    path = %path.display(),
                    "No embedded capture time, using modification time"
                );
                let modified = meta.modified().map_err(|e| ExtractError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                DateTime::<Local>::from(modified).naive_local()
            }
        };

        Ok(MediaFile {
            source_path: path.to_path_buf(),
            original_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            extension: extension_of(path),
            size_bytes: meta.len(),
            created: created.with_nanosecond(0).unwrap_or(created),
            larger_dimension,
            media_type,
        })
    }
}

impl FileMetadataExtractor {
    /// Ask `ffprobe` for the container's creation time. Any failure, including
    /// the tool being absent, yields `None`.
    fn probe_creation_time(&self, path: &Path) -> Option<NaiveDateTime> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .output();
        let output = match output {
            Ok(out) if out.status.success() => out,
            Ok(_) => return None,
            Err(e) => {
                tracing::trace!("ffprobe unavailable: {}", e);
                return None;
            }
        };
        let probe: ProbeOutput = serde_json::from_slice(&output.stdout).ok()?;
        creation_time_from_tags(&probe.format.tags)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    tags: HashMap<String, String>,
}

/// Pick the first parseable creation tag. Tag names vary in case between
/// containers, so lookups are case-insensitive.
fn creation_time_from_tags(tags: &HashMap<String, String>) -> Option<NaiveDateTime> {
    for key in ["creation_time", "date", "creation time"] {
        let value = tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.trim());
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            continue;
        };
        if let Some(parsed) = parse_container_time(value) {
            return Some(parsed);
        }
    }
    None
}

/// Container timestamps are usually RFC 3339 in UTC; they are converted to
/// local time so videos line up with camera-local EXIF times.
fn parse_container_time(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y:%m:%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

/// Read only the image header to find the larger pixel dimension.
fn image_larger_dimension(path: &Path) -> Option<u32> {
    match image::image_dimensions(path) {
        Ok((w, h)) if w > 0 || h > 0 => Some(w.max(h)),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("Could not read image dimensions of {}: {}", path.display(), e);
            None
        }
    }
}
