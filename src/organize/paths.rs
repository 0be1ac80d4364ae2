//! Destination layout: where a record goes and what it is called.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime};

use crate::config::LayoutConfig;
use crate::journal::types::NAME_TIMESTAMP_FORMAT;
use crate::journal::MediaRecord;
use crate::media::MediaType;
use crate::types::OrganizationScheme;

/// Compute the destination directory and file name for a record.
///
/// Pure: the same record, layout, duplicate flag and sequence number always
/// produce the same result. A `sequence` of 0 leaves the name unsuffixed.
pub fn assign(
    record: &MediaRecord,
    layout: &LayoutConfig,
    is_duplicate: bool,
    sequence: u32,
) -> (PathBuf, String) {
    (
        destination_dir(record, layout, is_duplicate),
        file_name(record, layout, sequence),
    )
}

/// [`assign`] joined into a single path.
pub fn destination_path(
    record: &MediaRecord,
    layout: &LayoutConfig,
    is_duplicate: bool,
    sequence: u32,
) -> PathBuf {
    let (dir, name) = assign(record, layout, is_duplicate, sequence);
    dir.join(name)
}

fn destination_dir(record: &MediaRecord, layout: &LayoutConfig, is_duplicate: bool) -> PathBuf {
    let ext = record.extension.as_str();
    let duplicates = &layout.duplicates_dir;

    // Per-extension overrides skip the scheme entirely.
    if let Some(override_dir) = layout.extension_destinations.get(ext) {
        let base = match (is_duplicate, duplicates.is_absolute()) {
            (false, _) => override_dir.clone(),
            (true, true) => duplicates.clone(),
            (true, false) => override_dir.join(duplicates),
        };
        return with_date(&base, &record.created);
    }

    let base = layout.base_dir(record.media_type);
    match layout.scheme {
        OrganizationScheme::ExtensionFirst => {
            let base = match (is_duplicate, duplicates.is_absolute()) {
                (false, _) => base.join(ext),
                (true, true) => duplicates.clone(),
                (true, false) => base.join(ext).join(duplicates),
            };
            with_date(&base, &record.created)
        }
        OrganizationScheme::DateFirst => {
            let base = match (is_duplicate, duplicates.is_absolute()) {
                (false, _) => base.to_path_buf(),
                (true, true) => duplicates.clone(),
                (true, false) => base.join(duplicates),
            };
            with_date(&base, &record.created).join(ext)
        }
    }
}

/// Append `YYYY/YYYY-MM/YYYY-MM-DD`.
fn with_date(base: &Path, created: &NaiveDateTime) -> PathBuf {
    let (y, m, d) = (created.year(), created.month(), created.day());
    base.join(format!("{y:04}"))
        .join(format!("{y:04}-{m:02}"))
        .join(format!("{y:04}-{m:02}-{d:02}"))
}

fn file_name(record: &MediaRecord, layout: &LayoutConfig, sequence: u32) -> String {
    let timestamp = record.created.format(NAME_TIMESTAMP_FORMAT).to_string();
    let mut name = String::with_capacity(timestamp.len() + record.original_name.len() + 16);
    name.push_str(&timestamp);

    let show_dimension = match layout.scheme {
        OrganizationScheme::ExtensionFirst => true,
        OrganizationScheme::DateFirst => record.media_type == MediaType::Image,
    };
    if let Some(dim) = record.larger_dimension.filter(|d| *d > 0 && show_dimension) {
        let _ = write!(name, "_{dim}");
    }

    if !layout.no_original_name {
        if let Some(stem) = original_stem(&record.original_name, &timestamp) {
            let stem = replace_spaces(&stem, &layout.space_replacement);
            match layout.scheme {
                OrganizationScheme::ExtensionFirst => {
                    let _ = write!(name, " ({stem})");
                }
                OrganizationScheme::DateFirst => {
                    let _ = write!(name, "_{stem}");
                }
            }
        }
    }

    if sequence > 0 {
        let _ = write!(name, "_{sequence:03}");
    }

    if !record.extension.is_empty() {
        name.push('.');
        name.push_str(&record.extension.to_ascii_lowercase());
    }
    name
}

/// Original name with every extension stripped, or `None` when it is empty or
/// already starts with the generated timestamp (an already organized file).
fn original_stem(original_name: &str, timestamp: &str) -> Option<String> {
    let mut stem = original_name;
    while let Some(dot) = stem.rfind('.') {
        if dot == 0 {
            break;
        }
        stem = &stem[..dot];
    }
    if stem.is_empty() || stem.starts_with(timestamp) {
        return None;
    }
    Some(stem.to_string())
}

/// Replace spaces unless the replacement is empty or itself only whitespace.
fn replace_spaces(stem: &str, replacement: &str) -> String {
    if replacement.trim().is_empty() {
        return stem.to_string();
    }
    stem.replace(' ', replacement)
}
