//! Reading and writing compressed `GeoJSON` feature collections.
//!
//! A missing file is reported as [`PolygonError::NotFound`] and nothing
//! else is: permission errors, truncated streams and malformed JSON are all
//! integrity failures that callers must not mistake for sparse coverage.

use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use geojson::{FeatureCollection, GeoJson};
use postcode_polygons_boundaries_models::Compression;

use crate::PolygonError;

/// Default zstd compression level.
const ZSTD_LEVEL: i32 = 19;

/// Reads and parses one compressed feature collection.
///
/// # Errors
///
/// Returns [`PolygonError::NotFound`] if the file does not exist, and an
/// integrity error if it cannot be opened, decompressed or parsed.
pub fn read_feature_collection(path: &Path, compression: Compression) -> Result<FeatureCollection, PolygonError> {
    let display = path.display().to_string();

    let file = std::fs::File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PolygonError::NotFound { path: display.clone() }
        } else {
            PolygonError::Io {
                path: display.clone(),
                source: Arc::new(e),
            }
        }
    })?;

    let bytes = decompress(BufReader::new(file), compression).map_err(|e| PolygonError::Decompress {
        path: display.clone(),
        source: Arc::new(e),
    })?;

    parse_feature_collection(&bytes).map_err(|message| PolygonError::Decode { path: display, message })
}

fn decompress(reader: impl Read, compression: Compression) -> std::io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    match compression {
        Compression::Gzip => {
            flate2::read::GzDecoder::new(reader).read_to_end(&mut bytes)?;
        }
        Compression::Zstd => {
            zstd::Decoder::new(reader)?.read_to_end(&mut bytes)?;
        }
        Compression::Bzip2 => {
            bzip2::read::BzDecoder::new(reader).read_to_end(&mut bytes)?;
        }
    }
    Ok(bytes)
}

fn parse_feature_collection(bytes: &[u8]) -> Result<FeatureCollection, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| format!("invalid UTF-8: {e}"))?;
    let geojson: GeoJson = text.parse().map_err(|e: geojson::Error| e.to_string())?;

    match geojson {
        GeoJson::FeatureCollection(collection) => Ok(collection),
        GeoJson::Feature(_) => Err("expected a FeatureCollection, found a Feature".to_string()),
        GeoJson::Geometry(_) => Err("expected a FeatureCollection, found a Geometry".to_string()),
    }
}

/// Serializes and compresses `collection` to `path`.
///
/// The file is written to a temporary sibling first and renamed into place,
/// so readers never observe a half-written collection.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be created or written.
pub fn write_feature_collection(
    path: &Path,
    collection: &FeatureCollection,
    compression: Compression,
) -> std::io::Result<u64> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension(format!("{}.tmp", compression.extension()));
    let file = std::fs::File::create(&tmp_path)?;
    let writer = BufWriter::new(file);

    match compression {
        Compression::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(writer, flate2::Compression::best());
            serde_json::to_writer(&mut encoder, collection)?;
            encoder.finish()?.flush()?;
        }
        Compression::Zstd => {
            let mut encoder = zstd::Encoder::new(writer, ZSTD_LEVEL)?;
            serde_json::to_writer(&mut encoder, collection)?;
            encoder.finish()?.flush()?;
        }
        Compression::Bzip2 => {
            let mut encoder = bzip2::write::BzEncoder::new(writer, bzip2::Compression::best());
            serde_json::to_writer(&mut encoder, collection)?;
            encoder.finish()?.flush()?;
        }
    }

    std::fs::rename(&tmp_path, path)?;

    Ok(std::fs::metadata(path)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geojson::{Feature, Geometry, Value};

    fn point_feature(id: &str, x: f64, y: f64) -> Feature {
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Point(vec![x, y]))),
            id: Some(geojson::feature::Id::String(id.to_string())),
            properties: None,
            foreign_members: None,
        }
    }

    fn collection(features: Vec<Feature>) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    fn tmp_dir(name: &str) -> std::path::PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&tmp);
        std::fs::create_dir_all(&tmp).unwrap();
        tmp
    }

    #[test]
    fn roundtrips_every_compression() {
        let tmp = tmp_dir("postcode_codec_roundtrip_test");
        let original = collection(vec![point_feature("AB1 2CD", 1.0, 2.0), point_feature("AB1 2CE", 3.0, 4.0)]);

        for compression in [Compression::Gzip, Compression::Zstd, Compression::Bzip2] {
            let path = tmp.join(format!("AB1.geojson.{}", compression.extension()));
            let size = write_feature_collection(&path, &original, compression).unwrap();
            assert!(size > 0);
            assert_eq!(std::fs::metadata(&path).unwrap().len(), size);

            let loaded = read_feature_collection(&path, compression).unwrap();
            assert_eq!(loaded.features.len(), 2);
            assert_eq!(loaded.features[0].geometry, original.features[0].geometry);
            assert_eq!(loaded.features[1].id, original.features[1].id);
        }

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = read_feature_collection(Path::new("/no/such/AB1.geojson.gz"), Compression::Gzip).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn corrupt_file_is_an_integrity_error() {
        let tmp = tmp_dir("postcode_codec_corrupt_test");
        let path = tmp.join("AB1.geojson.gz");
        std::fs::write(&path, b"not a gzip file").unwrap();

        let err = read_feature_collection(&path, Compression::Gzip).unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(err, PolygonError::Decompress { .. }));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn wrong_geojson_kind_is_a_decode_error() {
        let tmp = tmp_dir("postcode_codec_wrong_kind_test");
        let path = tmp.join("AB1.geojson.gz");

        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        encoder
            .write_all(br#"{"type":"Point","coordinates":[1.0,2.0]}"#)
            .unwrap();
        encoder.finish().unwrap();

        let err = read_feature_collection(&path, Compression::Gzip).unwrap_err();
        assert!(matches!(err, PolygonError::Decode { .. }));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn directory_in_place_of_file_is_not_absence() {
        let tmp = tmp_dir("postcode_codec_dir_test");
        let path = tmp.join("AB1.geojson.gz");
        std::fs::create_dir_all(&path).unwrap();

        let err = read_feature_collection(&path, Compression::Gzip).unwrap_err();
        assert!(!err.is_not_found());

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
