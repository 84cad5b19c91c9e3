#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for the postcode spatial index.
//!
//! All coordinates are whole metres on the British National Grid, stored
//! as `u32`. This crate has no heavyweight dependencies (no R-tree, no I/O)
//! so it can be shared by the index, the query planner and the API models.

use serde::{Deserialize, Serialize};

/// A point on the national grid, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    /// Metres east of the grid origin.
    pub easting: u32,
    /// Metres north of the grid origin.
    pub northing: u32,
}

impl Coordinate {
    /// Creates a new coordinate.
    #[must_use]
    pub const fn new(easting: u32, northing: u32) -> Self {
        Self { easting, northing }
    }
}

/// A single postcode centroid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodePoint {
    /// Full postcode, e.g. `"AB1 2CD"`.
    pub postcode: String,
    /// Easting in metres.
    pub easting: u32,
    /// Northing in metres.
    pub northing: u32,
}

impl CodePoint {
    /// Creates a new postcode point.
    #[must_use]
    pub fn new(postcode: impl Into<String>, easting: u32, northing: u32) -> Self {
        Self {
            postcode: postcode.into(),
            easting,
            northing,
        }
    }

    /// Returns the grid position of this postcode.
    #[must_use]
    pub const fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.easting, self.northing)
    }
}

/// An axis-aligned query window on the national grid.
///
/// Bounds are inclusive on all four edges. Constructors do not enforce
/// `min <= max`; validation happens in the query planner before a box
/// reaches the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western edge.
    pub min_easting: u32,
    /// Southern edge.
    pub min_northing: u32,
    /// Eastern edge.
    pub max_easting: u32,
    /// Northern edge.
    pub max_northing: u32,
}

impl BoundingBox {
    /// Creates a new bounding box from its four edges.
    #[must_use]
    pub const fn new(min_easting: u32, min_northing: u32, max_easting: u32, max_northing: u32) -> Self {
        Self {
            min_easting,
            min_northing,
            max_easting,
            max_northing,
        }
    }

    /// Returns `true` if both axes are well ordered.
    #[must_use]
    pub const fn is_well_ordered(&self) -> bool {
        self.min_easting <= self.max_easting && self.min_northing <= self.max_northing
    }

    /// East-west extent in metres.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.max_easting.saturating_sub(self.min_easting)
    }

    /// North-south extent in metres.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.max_northing.saturating_sub(self.min_northing)
    }

    /// Returns `true` if `point` lies inside the box, edges included.
    #[must_use]
    pub const fn contains(&self, point: Coordinate) -> bool {
        point.easting >= self.min_easting
            && point.easting <= self.max_easting
            && point.northing >= self.min_northing
            && point.northing <= self.max_northing
    }

    /// Returns a copy of this box grown outward by `margin` on every edge.
    ///
    /// Edges saturate at `0` and `u32::MAX` instead of wrapping.
    #[must_use]
    pub const fn expanded(&self, margin: u32) -> Self {
        Self {
            min_easting: self.min_easting.saturating_sub(margin),
            min_northing: self.min_northing.saturating_sub(margin),
            max_easting: self.max_easting.saturating_add(margin),
            max_northing: self.max_northing.saturating_add(margin),
        }
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_easting, self.min_northing, self.max_easting, self.max_northing
        )
    }
}

/// Returns the postcode district: everything before the first space.
///
/// A postcode without a space is its own district.
#[must_use]
pub fn district_of(postcode: &str) -> &str {
    let trimmed = postcode.trim();
    trimmed.split(' ').next().unwrap_or(trimmed)
}

/// Normalizes a postcode for use as a lookup key.
///
/// Trims the ends and collapses runs of inner whitespace to one space,
/// so `" AB1  2CD "` becomes `"AB1 2CD"`.
#[must_use]
pub fn normalize_postcode(postcode: &str) -> String {
    postcode.split_whitespace().collect::<Vec<_>>().join(" ")
}
