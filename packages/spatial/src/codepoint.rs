//! Code-Point Open loader.
//!
//! Code-Point Open ships as a zip archive with one headerless CSV per
//! postcode area under `Data/CSV/`. Each row starts with
//! `postcode, quality, easting, northing`; trailing columns are ignored.
//! A single plain CSV in the same row format is accepted too.
//!
//! Loading is all-or-nothing: the first malformed row aborts the load
//! with an error naming the archive entry and row number.

use std::io::Read;
use std::num::ParseIntError;
use std::path::Path;

use csv::StringRecord;
use postcode_polygons_spatial_models::{CodePoint, normalize_postcode};

use crate::records::{CsvParseError, CsvRecords};

/// Zip entry prefix holding the per-area CSV files.
pub const CSV_ENTRY_PREFIX: &str = "Data/CSV/";

const POSTCODE_FIELD: usize = 0;
const EASTING_FIELD: usize = 2;
const NORTHING_FIELD: usize = 3;

/// Reasons a single Code-Point row is rejected.
#[derive(Debug, thiserror::Error)]
pub enum CodePointRowError {
    /// The row is shorter than the four leading fields.
    #[error("expected at least 4 fields, found {0}")]
    TooFewFields(usize),

    /// Empty postcode field.
    #[error("missing postcode")]
    MissingPostcode,

    /// Easting is not a `u32`.
    #[error("invalid easting value '{value}': {source}")]
    InvalidEasting {
        /// Raw field value.
        value: String,
        /// Parse failure.
        source: ParseIntError,
    },

    /// Northing is not a `u32`.
    #[error("invalid northing value '{value}': {source}")]
    InvalidNorthing {
        /// Raw field value.
        value: String,
        /// Parse failure.
        source: ParseIntError,
    },
}

/// Errors from building the index out of a Code-Point source.
#[derive(Debug, thiserror::Error)]
pub enum IndexBuildError {
    /// The source path does not exist.
    #[error("Code-Point source not found: {0}")]
    SourceNotFound(String),

    /// I/O error opening the source.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The zip archive or one of its entries is unreadable.
    #[error("zip error in {path}: {source}")]
    Zip {
        /// Archive path.
        path: String,
        /// Underlying zip error.
        source: zip::result::ZipError,
    },

    /// A CSV row could not be read or parsed.
    #[error("error in {entry}: {source}")]
    Record {
        /// Archive entry or file the row came from.
        entry: String,
        /// Row-level failure, including its line number.
        source: CsvParseError,
    },
}

/// Maps one headerless Code-Point row to a [`CodePoint`].
///
/// # Errors
///
/// Returns an error if the row has fewer than four fields, an empty
/// postcode, or a non-numeric easting/northing.
pub fn parse_row(row: &StringRecord, _headers: &StringRecord) -> Result<CodePoint, CodePointRowError> {
    if row.len() <= NORTHING_FIELD {
        return Err(CodePointRowError::TooFewFields(row.len()));
    }

    let postcode = normalize_postcode(&row[POSTCODE_FIELD]);
    if postcode.is_empty() {
        return Err(CodePointRowError::MissingPostcode);
    }

    let easting_raw = row[EASTING_FIELD].trim();
    let easting = easting_raw
        .parse::<u32>()
        .map_err(|source| CodePointRowError::InvalidEasting {
            value: easting_raw.to_string(),
            source,
        })?;

    let northing_raw = row[NORTHING_FIELD].trim();
    let northing = northing_raw
        .parse::<u32>()
        .map_err(|source| CodePointRowError::InvalidNorthing {
            value: northing_raw.to_string(),
            source,
        })?;

    Ok(CodePoint {
        postcode,
        easting,
        northing,
    })
}

/// Row-mapping function used for Code-Point CSV files.
pub type RowParser = fn(&StringRecord, &StringRecord) -> Result<CodePoint, CodePointRowError>;

/// Streams Code-Point rows from any reader.
pub fn records<R: Read>(reader: R) -> CsvRecords<R, RowParser> {
    CsvRecords::new(reader, false, parse_row as RowParser)
}

/// Reads every row from `reader` into `on_point`.
///
/// `entry` names the source in error messages.
///
/// # Errors
///
/// Returns [`IndexBuildError::Record`] for the first bad row.
pub fn read_points(
    reader: impl Read,
    entry: &str,
    mut on_point: impl FnMut(CodePoint),
) -> Result<u64, IndexBuildError> {
    let mut count = 0u64;

    for record in records(reader) {
        let point = record.result.map_err(|source| IndexBuildError::Record {
            entry: entry.to_string(),
            source,
        })?;
        on_point(point);
        count += 1;
    }

    Ok(count)
}

/// Loads every point from a Code-Point zip archive or plain CSV file.
///
/// Files ending in `.zip` are read as archives; anything else is read as a
/// single headerless CSV.
///
/// # Errors
///
/// Returns an error if the path is missing, unreadable, or contains a
/// malformed row.
pub fn load_path(path: &Path, on_point: impl FnMut(CodePoint)) -> Result<u64, IndexBuildError> {
    if !path.exists() {
        return Err(IndexBuildError::SourceNotFound(path.display().to_string()));
    }

    let is_zip = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));

    if is_zip {
        load_zip(path, on_point)
    } else {
        let file = std::fs::File::open(path).map_err(|e| IndexBuildError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        read_points(
            std::io::BufReader::new(file),
            &path.display().to_string(),
            on_point,
        )
    }
}

/// Loads every point from the `Data/CSV/` entries of a Code-Point archive.
///
/// # Errors
///
/// Returns an error if the archive or any CSV entry cannot be read, or a
/// row is malformed.
pub fn load_zip(path: &Path, mut on_point: impl FnMut(CodePoint)) -> Result<u64, IndexBuildError> {
    log::info!("Reading Code-Point archive {}", path.display());

    let file = std::fs::File::open(path).map_err(|e| IndexBuildError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut archive = zip::ZipArchive::new(file).map_err(|e| IndexBuildError::Zip {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut total = 0u64;
    let mut entries_seen = 0u64;

    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|e| IndexBuildError::Zip {
            path: path.display().to_string(),
            source: e,
        })?;

        if entry.is_dir() || !entry.name().starts_with(CSV_ENTRY_PREFIX) {
            continue;
        }

        let name = entry.name().to_string();
        let count = read_points(entry, &name, &mut on_point)?;
        log::debug!("  {name}: {count} postcodes");

        total += count;
        entries_seen += 1;
    }

    log::info!("  archive complete: {entries_seen} CSV files, {total} postcodes");

    Ok(total)
}
