//! Media classification, metadata extraction and content hashing.
//!
//! Everything in here is consumed by the organize pipeline through the narrow
//! [`MetadataExtractor`] and [`ContentHasher`] traits so tests can swap in
//! deterministic implementations.

pub mod exif;
pub mod hash;
pub mod metadata;

use std::path::Path;

pub use hash::{Blake3Hasher, ContentHasher};
pub use metadata::{ExtractError, FileMetadataExtractor, MediaFile, MetadataExtractor};

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif", "nef", "arw", "cr2", "cr3", "dng",
    "heic", "heif", "raf",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m4v", "mpeg", "mpg", "3gp", "asf", "m2v",
    "vob", "mts",
];

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "aac", "ogg", "flac", "m4a", "wma", "amr"];

/// Kind of media a file holds, decided purely by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Image,
    Video,
    Audio,
}

impl MediaType {
    /// Convert to the string stored in the journal.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    /// Parse from the string stored in the journal.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }

    /// Classify a path by its extension. Returns `None` for anything that is
    /// not a recognized image, video or audio format.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = extension_of(path);
        if ext.is_empty() {
            return None;
        }
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Audio)
        } else {
            None
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercased extension without the leading dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}
