use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};

/// Tags consulted for the capture time, most specific first.
const CAPTURE_TAGS: &[exif::Tag] = &[
    exif::Tag::DateTimeOriginal,
    exif::Tag::DateTimeDigitized,
    exif::Tag::DateTime,
];

/// Read the capture time from an image's EXIF block.
///
/// Returns `Ok(Some(value))` if one of the date tags is present and parses,
/// `Ok(None)` if the file has no EXIF data or no usable tag, and `Err` only on
/// I/O failure.
pub fn read_capture_time(path: &Path) -> Result<Option<NaiveDateTime>> {
    let file =
        std::fs::File::open(path).with_context(|| format!("Opening {}", path.display()))?;
    let mut bufreader = std::io::BufReader::new(&file);
    let exif_reader = exif::Reader::new();

    let exif_data = match exif_reader.read_from_container(&mut bufreader) {
        Ok(data) => data,
        Err(e) => {
            tracing::debug!("No EXIF data in {}: {}", path.display(), e);
            return Ok(None);
        }
    };

    for tag in CAPTURE_TAGS {
        let Some(field) = exif_data.get_field(*tag, exif::In::PRIMARY) else {
            continue;
        };
        if let exif::Value::Ascii(ref values) = field.value {
            if let Some(parsed) = values.first().and_then(|raw| parse_exif_datetime(raw)) {
                return Ok(Some(parsed));
            }
        }
    }
    Ok(None)
}

/// Parse an EXIF `"YYYY:MM:DD HH:MM:SS"` ASCII value. Zeroed placeholder dates
/// written by some cameras are rejected.
fn parse_exif_datetime(raw: &[u8]) -> Option<NaiveDateTime> {
    let dt = exif::DateTime::from_ascii(raw).ok()?;
    NaiveDate::from_ymd_opt(dt.year as i32, dt.month as u32, dt.day as u32)?.and_hms_opt(
        dt.hour as u32,
        dt.minute as u32,
        dt.second as u32,
    )
}
