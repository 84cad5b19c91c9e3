//! Converts a boundary archive into the per-district polygon layout.
//!
//! The input is a tar archive (optionally gzip-, zstd- or bzip2-compressed) holding
//! one `GeoJSON` feature collection per district under `*/units/` and
//! `*/districts/`. Each feature gets its postcode or district as its `id`,
//! a `type` property, and coordinates truncated to six decimal places, and
//! each collection is written compressed to
//! `<out>/<target>/<district>.geojson.<ext>`.

use std::io::Read;
use std::path::Path;

use geojson::{FeatureCollection, GeoJson, Value};
use postcode_polygons_boundaries_models::{Compression, PolygonTarget, polygon_path};

use crate::codec::write_feature_collection;

const COORDINATE_SCALE: f64 = 1e6;
const GEOJSON_SUFFIX: &str = ".geojson";

/// Errors from preparing polygon files.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    /// The archive could not be opened or read.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An archive entry is not a `GeoJSON` feature collection.
    #[error("failed to parse {entry}: {message}")]
    Parse {
        /// Archive entry name.
        entry: String,
        /// Parser message.
        message: String,
    },

    /// A feature lacks the string property its id is taken from.
    #[error("feature {index} in {entry} has no string '{property}' property")]
    MissingId {
        /// Archive entry name.
        entry: String,
        /// Feature position in the collection.
        index: usize,
        /// Property that was expected.
        property: &'static str,
    },

    /// A feature has a geometry other than `Polygon` or `MultiPolygon`.
    #[error("feature {index} in {entry} has unsupported geometry {kind}")]
    UnsupportedGeometry {
        /// Archive entry name.
        entry: String,
        /// Feature position in the collection.
        index: usize,
        /// Geometry type name.
        kind: String,
    },

    /// An output file could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Output path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Outcome of [`extract_archive`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Collections written.
    pub written: u64,
    /// Collections whose output already existed.
    pub skipped: u64,
    /// Archive entries outside `units/` and `districts/`.
    pub ignored: u64,
    /// Uncompressed input bytes of written collections.
    pub bytes_in: u64,
    /// Compressed output bytes of written collections.
    pub bytes_out: u64,
}

/// Property holding a feature's identifier in the source data.
const fn id_property(target: PolygonTarget) -> &'static str {
    match target {
        PolygonTarget::Units => "postcodes",
        PolygonTarget::Districts => "district",
    }
}

fn truncate(value: f64) -> f64 {
    (value * COORDINATE_SCALE).trunc() / COORDINATE_SCALE
}

fn truncate_rings(rings: &mut [Vec<Vec<f64>>]) {
    for position in rings.iter_mut().flatten() {
        for value in position.iter_mut().take(2) {
            *value = truncate(*value);
        }
    }
}

const fn geometry_kind(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

/// Rewrites one source collection into the stored form.
///
/// # Errors
///
/// Returns an error if the content is not a feature collection, a feature
/// has no string id property, or a geometry is not a polygon.
pub fn reprocess(content: &[u8], target: PolygonTarget, entry: &str) -> Result<FeatureCollection, PrepareError> {
    let parse_error = |message: String| PrepareError::Parse {
        entry: entry.to_string(),
        message,
    };

    let text = std::str::from_utf8(content).map_err(|e| parse_error(e.to_string()))?;
    let mut collection = match text.parse::<GeoJson>() {
        Ok(GeoJson::FeatureCollection(collection)) => collection,
        Ok(_) => return Err(parse_error("expected a FeatureCollection".to_string())),
        Err(e) => return Err(parse_error(e.to_string())),
    };

    let property = id_property(target);

    for (index, feature) in collection.features.iter_mut().enumerate() {
        let properties = feature.properties.get_or_insert_with(Default::default);

        let id = match properties.remove(property) {
            Some(serde_json::Value::String(id)) => id,
            _ => {
                return Err(PrepareError::MissingId {
                    entry: entry.to_string(),
                    index,
                    property,
                });
            }
        };

        properties.remove("mapit_code");
        properties.insert(
            "type".to_string(),
            serde_json::Value::String(target.feature_type().to_string()),
        );
        feature.id = Some(geojson::feature::Id::String(id));

        match feature.geometry.as_mut().map(|g| &mut g.value) {
            Some(Value::Polygon(rings)) => truncate_rings(rings),
            Some(Value::MultiPolygon(polygons)) => {
                for rings in polygons.iter_mut() {
                    truncate_rings(rings);
                }
            }
            other => {
                return Err(PrepareError::UnsupportedGeometry {
                    entry: entry.to_string(),
                    index,
                    kind: other.map_or("null", |value| geometry_kind(value)).to_string(),
                });
            }
        }
    }

    Ok(collection)
}

/// Works out which target directory and district an archive entry maps to.
fn classify_entry(path: &Path) -> Option<(PolygonTarget, String)> {
    let directory = path.parent()?.file_name()?.to_str()?;
    let target = directory.parse::<PolygonTarget>().ok()?;

    let name = path.file_name()?.to_str()?;
    let district = name.strip_suffix(GEOJSON_SUFFIX)?;

    Some((target, district.to_string()))
}

fn open_archive(path: &Path) -> Result<Box<dyn Read>, PrepareError> {
    let io_error = |source| PrepareError::Io {
        path: path.display().to_string(),
        source,
    };

    let file = std::io::BufReader::new(std::fs::File::open(path).map_err(io_error)?);
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Ok(Box::new(flate2::read::GzDecoder::new(file)))
    } else if name.ends_with(".tar.zst") {
        Ok(Box::new(zstd::Decoder::new(file).map_err(io_error)?))
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
        Ok(Box::new(bzip2::read::BzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

#[allow(clippy::cast_precision_loss)]
fn reduction_percent(before: u64, after: u64) -> f64 {
    if before == 0 {
        return 0.0;
    }
    100.0 - (after as f64 / before as f64) * 100.0
}

/// Extracts every unit and district collection from `archive` into
/// `out_dir`.
///
/// Outputs that already exist are left untouched, so an interrupted run can
/// be resumed.
///
/// # Errors
///
/// Returns an error if the archive cannot be read, an entry cannot be
/// reprocessed, or an output cannot be written.
pub fn extract_archive(
    archive: &Path,
    out_dir: &Path,
    compression: Compression,
) -> Result<ExtractSummary, PrepareError> {
    log::info!("Extracting polygons from {}", archive.display());

    let archive_error = |source| PrepareError::Io {
        path: archive.display().to_string(),
        source,
    };

    let mut tar = tar::Archive::new(open_archive(archive)?);
    let mut summary = ExtractSummary::default();

    for entry in tar.entries().map_err(archive_error)? {
        let mut entry = entry.map_err(archive_error)?;
        let entry_path = entry.path().map_err(archive_error)?.into_owned();
        let entry_name = entry_path.display().to_string();

        let classified = if entry.header().entry_type().is_file() {
            classify_entry(&entry_path)
        } else {
            None
        };

        let Some((target, district)) = classified else {
            log::debug!("Skipping {entry_name}");
            summary.ignored += 1;
            continue;
        };

        let output = polygon_path(out_dir, target, &district, compression);
        if output.is_file() {
            log::info!("Skipping {entry_name} (already exists)");
            summary.skipped += 1;
            continue;
        }

        let mut content = Vec::new();
        entry.read_to_end(&mut content).map_err(archive_error)?;

        let collection = reprocess(&content, target, &entry_name)?;
        let size = write_feature_collection(&output, &collection, compression).map_err(|source| {
            PrepareError::Write {
                path: output.display().to_string(),
                source,
            }
        })?;

        let original = content.len() as u64;
        log::info!(
            "Processed {target}/{district}: {original} -> {size} bytes ({:.2}% reduction)",
            reduction_percent(original, size)
        );

        summary.written += 1;
        summary.bytes_in += original;
        summary.bytes_out += size;
    }

    log::info!(
        "Extraction complete: {} written, {} skipped, {} ignored",
        summary.written,
        summary.skipped,
        summary.ignored
    );

    Ok(summary)
}
