#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Polygon store for postcode unit and district boundaries.
//!
//! Boundaries are stored as one compressed `GeoJSON` feature collection per
//! postcode district. [`CachedPolygonRepository`] decompresses them on a
//! blocking thread and keeps the parsed collections in a
//! [`SingleFlightCache`], so a district requested by many concurrent queries
//! is only read once per expiry period.

pub mod cache;
pub mod codec;
pub mod prepare;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use geojson::{Feature, FeatureCollection};
use tokio::task::JoinHandle;

pub use cache::{CacheStats, SingleFlightCache};
pub use postcode_polygons_boundaries_models::{CacheConfig, Compression, PolygonTarget, polygon_path};

/// Errors from loading a district's polygons.
///
/// Cloneable so that one failed load can be reported to every caller that
/// was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PolygonError {
    /// No polygon file exists for the district. Callers treat this as
    /// sparse coverage, not failure.
    #[error("polygon file not found: {path}")]
    NotFound {
        /// Expected file path.
        path: String,
    },

    /// The file exists but could not be opened.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying I/O error.
        source: Arc<std::io::Error>,
    },

    /// The compressed stream is corrupt or truncated.
    #[error("failed to decompress {path}: {source}")]
    Decompress {
        /// File path.
        path: String,
        /// Underlying I/O error from the decoder.
        source: Arc<std::io::Error>,
    },

    /// The decompressed bytes are not a `GeoJSON` feature collection.
    #[error("failed to decode {path}: {message}")]
    Decode {
        /// File path.
        path: String,
        /// Parser message.
        message: String,
    },

    /// The load task panicked or was cancelled.
    #[error("polygon load task failed: {0}")]
    Task(String),
}

impl PolygonError {
    /// Returns `true` only for a missing file.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<tokio::task::JoinError> for PolygonError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Blocking source of per-district feature collections.
pub trait FeatureSource: Send + Sync {
    /// Location that identifies the collection, used as the cache key.
    fn location(&self, target: PolygonTarget, district: &str) -> PathBuf;

    /// Reads and parses the collection.
    ///
    /// # Errors
    ///
    /// Returns [`PolygonError::NotFound`] if the district has no file, and
    /// any other variant if the file is unreadable or corrupt.
    fn load(&self, target: PolygonTarget, district: &str) -> Result<FeatureCollection, PolygonError>;
}

impl<S: FeatureSource + ?Sized> FeatureSource for Arc<S> {
    fn location(&self, target: PolygonTarget, district: &str) -> PathBuf {
        (**self).location(target, district)
    }

    fn load(&self, target: PolygonTarget, district: &str) -> Result<FeatureCollection, PolygonError> {
        (**self).load(target, district)
    }
}

/// Reads collections from `<base>/<target>/<district>.geojson.<ext>`.
#[derive(Debug, Clone)]
pub struct FileFeatureSource {
    base: PathBuf,
    compression: Compression,
}

impl FileFeatureSource {
    #[must_use]
    pub fn new(base: impl Into<PathBuf>, compression: Compression) -> Self {
        Self {
            base: base.into(),
            compression,
        }
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl FeatureSource for FileFeatureSource {
    fn location(&self, target: PolygonTarget, district: &str) -> PathBuf {
        polygon_path(&self.base, target, district, self.compression)
    }

    fn load(&self, target: PolygonTarget, district: &str) -> Result<FeatureCollection, PolygonError> {
        codec::read_feature_collection(&self.location(target, district), self.compression)
    }
}

/// Async access to per-district polygon collections.
#[async_trait]
pub trait PolygonRepository: Send + Sync {
    /// Returns the full collection stored for `district`.
    ///
    /// # Errors
    ///
    /// See [`FeatureSource::load`].
    async fn feature_collection(
        &self,
        target: PolygonTarget,
        district: &str,
    ) -> Result<Arc<FeatureCollection>, PolygonError>;
}

type CollectionCache = SingleFlightCache<PathBuf, Arc<FeatureCollection>, PolygonError>;

/// [`PolygonRepository`] that caches parsed collections by file path.
pub struct CachedPolygonRepository<S> {
    source: Arc<S>,
    cache: Arc<CollectionCache>,
    config: CacheConfig,
}

impl<S: FeatureSource + 'static> CachedPolygonRepository<S> {
    #[must_use]
    pub fn new(source: S, config: CacheConfig) -> Self {
        Self {
            source: Arc::new(source),
            cache: Arc::new(SingleFlightCache::new(config.ttl())),
            config,
        }
    }

    /// Starts the background expiry sweep, if one is configured.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_sweeper(&self) -> Option<JoinHandle<()>> {
        self.config.sweep_interval().map(|interval| {
            log::info!("Polygon cache sweep every {}s", interval.as_secs());
            self.cache.spawn_sweeper(interval)
        })
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    #[must_use]
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl<S: FeatureSource + 'static> PolygonRepository for CachedPolygonRepository<S> {
    async fn feature_collection(
        &self,
        target: PolygonTarget,
        district: &str,
    ) -> Result<Arc<FeatureCollection>, PolygonError> {
        let key = self.source.location(target, district);
        let source = Arc::clone(&self.source);
        let district = district.to_string();

        self.cache
            .get_or_load(key, move || async move {
                log::debug!("Loading {target} polygons for {district}");
                tokio::task::spawn_blocking(move || source.load(target, &district).map(Arc::new)).await?
            })
            .await
    }
}

/// Returns a feature's identifier when it is a string.
///
/// Numeric ids never match a postcode or district.
#[must_use]
pub fn feature_id(feature: &Feature) -> Option<&str> {
    match feature.id.as_ref()? {
        geojson::feature::Id::String(id) => Some(id.as_str()),
        geojson::feature::Id::Number(_) => None,
    }
}

/// Loads every district in `districts` and keeps the features whose id is
/// in `requested`.
///
/// Districts with no polygon file are skipped. Any other failure aborts the
/// whole collection. An empty `districts` set performs no loads.
///
/// # Errors
///
/// Returns the first non-`NotFound` error from any district.
pub async fn collect_features(
    repository: &dyn PolygonRepository,
    target: PolygonTarget,
    districts: &BTreeSet<String>,
    requested: &BTreeSet<String>,
) -> Result<FeatureCollection, PolygonError> {
    let mut collection = FeatureCollection {
        bbox: None,
        features: Vec::new(),
        foreign_members: None,
    };

    if districts.is_empty() {
        return Ok(collection);
    }

    let loads = districts.iter().map(|district| async move {
        match repository.feature_collection(target, district).await {
            Ok(loaded) => Ok(Some(loaded)),
            Err(e) if e.is_not_found() => {
                log::debug!("No {target} polygons for district {district}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    });

    let loaded = futures::future::try_join_all(loads).await?;

    collection.features = loaded
        .iter()
        .flatten()
        .flat_map(|c| c.features.iter())
        .filter(|feature| feature_id(feature).is_some_and(|id| requested.contains(id)))
        .cloned()
        .collect();

    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use geojson::{Geometry, Value};

    fn feature(id: &str) -> Feature {
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Point(vec![0.0, 0.0]))),
            id: Some(geojson::feature::Id::String(id.to_string())),
            properties: None,
            foreign_members: None,
        }
    }

    fn fc(ids: &[&str]) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features: ids.iter().map(|id| feature(id)).collect(),
            foreign_members: None,
        }
    }

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(ToString::to_string).collect()
    }

    /// In-memory source that counts loads and can be told to fail.
    #[derive(Default)]
    struct FakeSource {
        collections: HashMap<String, FeatureCollection>,
        corrupt: Vec<String>,
        delay: Duration,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn with(mut self, district: &str, ids: &[&str]) -> Self {
            self.collections.insert(district.to_string(), fc(ids));
            self
        }

        fn corrupt(mut self, district: &str) -> Self {
            self.corrupt.push(district.to_string());
            self
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    impl FeatureSource for FakeSource {
        fn location(&self, target: PolygonTarget, district: &str) -> PathBuf {
            polygon_path(Path::new("fake"), target, district, Compression::Gzip)
        }

        fn load(&self, _target: PolygonTarget, district: &str) -> Result<FeatureCollection, PolygonError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(district.to_string());
            std::thread::sleep(self.delay);

            if self.corrupt.iter().any(|d| d == district) {
                return Err(PolygonError::Decode {
                    path: district.to_string(),
                    message: "bad json".to_string(),
                });
            }

            self.collections
                .get(district)
                .cloned()
                .ok_or_else(|| PolygonError::NotFound {
                    path: district.to_string(),
                })
        }
    }

    fn repository(source: &Arc<FakeSource>) -> CachedPolygonRepository<Arc<FakeSource>> {
        CachedPolygonRepository::new(Arc::clone(source), CacheConfig::default())
    }

    #[tokio::test]
    async fn filters_by_requested_ids() {
        let source = Arc::new(FakeSource::default().with("AB1", &["AB1 2CD", "AB1 2CE", "AB1 9ZZ"]));
        let repo = repository(&source);

        let result = collect_features(&repo, PolygonTarget::Units, &set(&["AB1"]), &set(&["AB1 2CD", "AB1 9ZZ"]))
            .await
            .unwrap();

        let mut ids: Vec<_> = result.features.iter().filter_map(feature_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["AB1 2CD", "AB1 9ZZ"]);
    }

    #[tokio::test]
    async fn missing_district_is_skipped() {
        let source = Arc::new(FakeSource::default().with("AB1", &["AB1"]));
        let repo = repository(&source);

        let result = collect_features(
            &repo,
            PolygonTarget::Districts,
            &set(&["AB1", "ZZ9"]),
            &set(&["AB1", "ZZ9"]),
        )
        .await
        .unwrap();

        assert_eq!(result.features.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn corrupt_district_fails_the_whole_query() {
        let source = Arc::new(FakeSource::default().with("AB1", &["AB1"]).corrupt("AB2"));
        let repo = repository(&source);

        let err = collect_features(
            &repo,
            PolygonTarget::Districts,
            &set(&["AB1", "AB2"]),
            &set(&["AB1", "AB2"]),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PolygonError::Decode { .. }));
    }

    #[tokio::test]
    async fn empty_selection_loads_nothing() {
        let source = Arc::new(FakeSource::default().with("AB1", &["AB1"]));
        let repo = repository(&source);

        let result = collect_features(&repo, PolygonTarget::Units, &BTreeSet::new(), &BTreeSet::new())
            .await
            .unwrap();

        assert!(result.features.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn numeric_ids_never_match() {
        let mut collection = fc(&["AB1 2CD"]);
        let mut numeric = feature("unused");
        numeric.id = Some(geojson::feature::Id::Number(1.into()));
        collection.features.push(numeric);

        let source = Arc::new(FakeSource {
            collections: HashMap::from([("AB1".to_string(), collection)]),
            ..FakeSource::default()
        });
        let repo = repository(&source);

        let result = collect_features(&repo, PolygonTarget::Units, &set(&["AB1"]), &set(&["AB1 2CD", "1"]))
            .await
            .unwrap();
        assert_eq!(result.features.len(), 1);
    }

    #[tokio::test]
    async fn repeated_queries_load_each_file_once() {
        let source = Arc::new(FakeSource::default().with("AB1", &["AB1 2CD"]));
        let repo = repository(&source);

        for _ in 0..3 {
            let result = collect_features(&repo, PolygonTarget::Units, &set(&["AB1"]), &set(&["AB1 2CD"]))
                .await
                .unwrap();
            assert_eq!(result.features.len(), 1);
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(repo.stats().loads, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_cold_requests_share_one_load() {
        let source = Arc::new(
            FakeSource::default()
                .with("AB1", &["AB1 2CD"])
                .slow(Duration::from_millis(50)),
        );
        let repo = Arc::new(repository(&source));

        let tasks: Vec<_> = (0..12)
            .map(|_| {
                let repo = Arc::clone(&repo);
                tokio::spawn(async move { repo.feature_collection(PolygonTarget::Units, "AB1").await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().features.len(), 1);
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures_are_shared_and_not_cached() {
        let source = Arc::new(FakeSource::default().corrupt("AB1").slow(Duration::from_millis(50)));
        let repo = Arc::new(repository(&source));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let repo = Arc::clone(&repo);
                tokio::spawn(async move { repo.feature_collection(PolygonTarget::Units, "AB1").await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_err());
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(repo.cached_entries(), 0);

        assert!(repo.feature_collection(PolygonTarget::Units, "AB1").await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn units_and_districts_are_cached_separately() {
        let source = Arc::new(FakeSource::default().with("AB1", &["AB1"]));
        let repo = repository(&source);

        repo.feature_collection(PolygonTarget::Units, "AB1").await.unwrap();
        repo.feature_collection(PolygonTarget::Districts, "AB1").await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(repo.cached_entries(), 2);
    }

    #[tokio::test]
    async fn reads_real_files_from_disk() {
        let tmp = std::env::temp_dir().join("postcode_boundaries_repo_test");
        let _ = std::fs::remove_dir_all(&tmp);

        let path = polygon_path(&tmp, PolygonTarget::Units, "AB1", Compression::Zstd);
        codec::write_feature_collection(&path, &fc(&["AB1 2CD", "AB1 2CE"]), Compression::Zstd).unwrap();

        let repo = CachedPolygonRepository::new(FileFeatureSource::new(&tmp, Compression::Zstd), CacheConfig::default());
        let result = collect_features(&repo, PolygonTarget::Units, &set(&["AB1", "AB2"]), &set(&["AB1 2CE"]))
            .await
            .unwrap();

        assert_eq!(result.features.len(), 1);
        assert_eq!(feature_id(&result.features[0]), Some("AB1 2CE"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn sweeper_is_optional() {
        let source = Arc::new(FakeSource::default());
        let disabled = CachedPolygonRepository::new(
            Arc::clone(&source),
            CacheConfig {
                ttl_secs: 1,
                sweep_interval_secs: 0,
            },
        );
        assert!(disabled.start_sweeper().is_none());

        let enabled = repository(&source);
        let handle = enabled.start_sweeper().unwrap();
        handle.abort();
    }
}
