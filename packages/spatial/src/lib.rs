#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial index of postcode centroids.
//!
//! Loads Code-Point Open points at startup, builds an R-tree over their
//! grid coordinates, and answers closed-window queries. The index is built
//! once on a single thread and is read-only afterwards, so it can be shared
//! across request handlers behind an `Arc` without locking.

pub mod codepoint;
pub mod records;

use std::ops::ControlFlow;
use std::path::Path;

use rstar::{AABB, RTree, RTreeObject};

pub use codepoint::IndexBuildError;
pub use postcode_polygons_spatial_models::{BoundingBox, CodePoint, Coordinate};

/// Capability interface for a postcode point index.
///
/// Callers are expected to pass well-ordered boxes; validation lives in the
/// query planner. A box that matches nothing yields nothing, never an error.
pub trait PointIndex: Send + Sync {
    /// Adds one record. Duplicates are kept.
    fn insert(&mut self, coordinate: Coordinate, postcode: String);

    /// Lazily iterates every record inside `bbox`, edges included.
    ///
    /// Dropping the iterator stops the traversal. Order is unspecified.
    fn search_iter<'a>(&'a self, bbox: &BoundingBox) -> Box<dyn Iterator<Item = &'a CodePoint> + 'a>;

    /// Number of records indexed, duplicates counted.
    fn len(&self) -> usize;

    /// Returns `true` if nothing has been indexed.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls `visitor` for each record inside `bbox` until it breaks.
    fn visit(&self, bbox: &BoundingBox, visitor: &mut dyn FnMut(&CodePoint) -> ControlFlow<()>) {
        for point in self.search_iter(bbox) {
            if visitor(point).is_break() {
                break;
            }
        }
    }

    /// Collects every record inside `bbox`.
    fn search(&self, bbox: &BoundingBox) -> Vec<CodePoint> {
        self.search_iter(bbox).cloned().collect()
    }
}

/// A postcode stored in the R-tree.
struct PointEntry(CodePoint);

impl RTreeObject for PointEntry {
    type Envelope = AABB<[i64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(grid_point(self.0.coordinate()))
    }
}

/// `rstar` needs a signed scalar, so `u32` grid values are widened.
fn grid_point(coordinate: Coordinate) -> [i64; 2] {
    [i64::from(coordinate.easting), i64::from(coordinate.northing)]
}

fn grid_envelope(bbox: &BoundingBox) -> AABB<[i64; 2]> {
    AABB::from_corners(
        [i64::from(bbox.min_easting), i64::from(bbox.min_northing)],
        [i64::from(bbox.max_easting), i64::from(bbox.max_northing)],
    )
}

/// R-tree backed [`PointIndex`].
pub struct RTreePointIndex {
    tree: RTree<PointEntry>,
}

impl Default for RTreePointIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl RTreePointIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self { tree: RTree::new() }
    }

    /// Builds an index from a batch of points in one pass.
    ///
    /// Bulk loading produces a better-balanced tree than repeated inserts
    /// and is what startup uses.
    #[must_use]
    pub fn bulk_load(points: Vec<CodePoint>) -> Self {
        let entries = points.into_iter().map(PointEntry).collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Loads a Code-Point Open zip archive (or plain CSV) and builds the
    /// index.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is missing or unreadable, or if any
    /// row is malformed. No partial index is returned.
    pub fn from_codepoint(path: &Path) -> Result<Self, IndexBuildError> {
        let mut points = Vec::new();
        codepoint::load_path(path, |point| points.push(point))?;

        log::info!("Building R-tree over {} postcodes", points.len());
        let index = Self::bulk_load(points);
        log::info!("Spatial index ready with {} entries", index.len());

        Ok(index)
    }
}

impl PointIndex for RTreePointIndex {
    fn insert(&mut self, coordinate: Coordinate, postcode: String) {
        self.tree.insert(PointEntry(CodePoint {
            postcode,
            easting: coordinate.easting,
            northing: coordinate.northing,
        }));
    }

    fn search_iter<'a>(&'a self, bbox: &BoundingBox) -> Box<dyn Iterator<Item = &'a CodePoint> + 'a> {
        let envelope = grid_envelope(bbox);
        Box::new(
            self.tree
                .locate_in_envelope(&envelope)
                .map(|entry| &entry.0),
        )
    }

    fn len(&self) -> usize {
        self.tree.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(points: &[(&str, u32, u32)]) -> RTreePointIndex {
        let mut index = RTreePointIndex::new();
        for (postcode, easting, northing) in points {
            index.insert(Coordinate::new(*easting, *northing), (*postcode).to_string());
        }
        index
    }

    #[test]
    fn insert_then_query_returns_all_points() {
        let index = index_of(&[("PC1", 100, 200), ("PC2", 300, 400), ("PC3", 500, 500)]);

        assert_eq!(index.len(), 3);
        assert_eq!(index.search(&BoundingBox::new(0, 0, 500, 500)).len(), 3);
    }

    #[test]
    fn query_selects_only_points_inside() {
        let index = index_of(&[("PC1", 100, 200), ("PC2", 300, 400)]);

        let hits = index.search(&BoundingBox::new(90, 190, 110, 210));
        assert_eq!(hits, vec![CodePoint::new("PC1", 100, 200)]);
    }

    #[test]
    fn window_edges_are_inclusive() {
        let index = index_of(&[("EDGE", 1000, 2000)]);

        assert_eq!(index.search(&BoundingBox::new(1000, 2000, 1000, 2000)).len(), 1);
        assert_eq!(index.search(&BoundingBox::new(900, 1900, 1000, 2000)).len(), 1);
        assert!(index.search(&BoundingBox::new(1001, 2000, 1100, 2100)).is_empty());
    }

    #[test]
    fn empty_window_is_not_an_error() {
        let index = index_of(&[("PC1", 100, 200)]);
        assert!(index.search(&BoundingBox::new(1000, 1000, 2000, 2000)).is_empty());
        assert!(RTreePointIndex::new().search(&BoundingBox::new(0, 0, 10, 10)).is_empty());
    }

    #[test]
    fn duplicates_are_additive() {
        let index = index_of(&[("PC1", 100, 200), ("PC1", 100, 200)]);

        assert_eq!(index.len(), 2);
        assert_eq!(index.search(&BoundingBox::new(0, 0, 500, 500)).len(), 2);
    }

    #[test]
    fn visitor_can_stop_early() {
        let index = index_of(&[("A", 1, 1), ("B", 2, 2), ("C", 3, 3), ("D", 4, 4)]);

        let mut seen = 0;
        index.visit(&BoundingBox::new(0, 0, 10, 10), &mut |_| {
            seen += 1;
            if seen == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        assert_eq!(seen, 2);
    }

    #[test]
    fn lazy_iterator_can_stop_early() {
        let index = index_of(&[("A", 1, 1), ("B", 2, 2), ("C", 3, 3)]);
        assert_eq!(index.search_iter(&BoundingBox::new(0, 0, 10, 10)).take(1).count(), 1);
    }

    #[test]
    fn bulk_load_matches_inserts() {
        let index = RTreePointIndex::bulk_load(vec![
            CodePoint::new("AB1 2CD", 531_900, 184_200),
            CodePoint::new("AB1 2CE", 541_900, 194_200),
        ]);

        assert_eq!(index.len(), 2);
        let hits = index.search(&BoundingBox::new(531_800, 184_100, 532_000, 184_300));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].postcode, "AB1 2CD");
    }

    #[test]
    fn handles_grid_extremes() {
        let index = index_of(&[("MAX", u32::MAX, u32::MAX), ("MIN", 0, 0)]);
        assert_eq!(index.search(&BoundingBox::new(0, 0, u32::MAX, u32::MAX)).len(), 2);
    }

    #[test]
    fn builds_from_codepoint_csv() {
        let tmp = std::env::temp_dir().join("postcode_spatial_index_build_test");
        let _ = std::fs::remove_dir_all(&tmp);
        std::fs::create_dir_all(&tmp).unwrap();

        let csv_path = tmp.join("points.csv");
        std::fs::write(&csv_path, "PC1,PC2,1,2\nPC2,PC3,3,4\nPC3,PC4,5,6\n").unwrap();

        let index = RTreePointIndex::from_codepoint(&csv_path).unwrap();
        assert_eq!(index.len(), 3);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn shared_across_threads() {
        let index: std::sync::Arc<dyn PointIndex> =
            std::sync::Arc::new(index_of(&[("PC1", 10, 10), ("PC2", 20, 20)]));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let index = index.clone();
                std::thread::spawn(move || index.search(&BoundingBox::new(0, 0, 100, 100)).len())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 2);
        }
    }
}
