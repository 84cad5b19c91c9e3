#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Query planning for postcode lookups.
//!
//! Turns a raw `bbox` query string into a validated [`BoundingBox`],
//! classifies it into a [`Tier`], resolves the postcode units it covers and
//! assembles the matching polygons. [`PostcodeSearch`] ties the pieces
//! together for the HTTP layer.

pub mod resolve;
pub mod search;

use postcode_polygons_boundaries::PolygonTarget;
use postcode_polygons_spatial_models::BoundingBox;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

pub use resolve::{UnitSelection, resolve_units};
pub use search::{PostcodeSearch, SearchError};

/// Largest width or height, in metres, served at unit granularity.
pub const DEFAULT_MAX_EXTENT: u32 = 5000;

/// Metres added to each edge of a unit-granularity polygon query.
pub const DEFAULT_FINE_MARGIN: u32 = 100;

/// Errors from validating a client bounding box.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// Not exactly four comma-separated fields.
    #[error("bbox must have 4 comma-separated values")]
    InvalidFormat,

    /// A field is not an unsigned 32-bit integer.
    #[error("invalid bbox value '{0}': not a valid unsigned integer")]
    InvalidValue(String),

    /// `min > max` on either axis.
    #[error("invalid bbox: min values must be less than or equal to max values")]
    InvalidRange,

    /// Point search box wider or taller than the maximum extent.
    #[error("bbox is too large, must be at most {max_extent}m in width and height")]
    BBoxTooLarge {
        /// Configured limit in metres.
        max_extent: u32,
    },
}

/// Granularity of a polygon query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Tier {
    /// Per-postcode polygons.
    Fine,
    /// Per-district polygons.
    Coarse,
}

impl Tier {
    /// Polygon files that serve this tier.
    #[must_use]
    pub const fn target(self) -> PolygonTarget {
        match self {
            Self::Fine => PolygonTarget::Units,
            Self::Coarse => PolygonTarget::Districts,
        }
    }
}

/// Tunable limits for query planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Boxes wider or taller than this are coarse for polygon search and
    /// rejected for point search.
    #[serde(default = "default_max_extent")]
    pub max_extent: u32,

    /// Edge expansion applied to fine-tier polygon queries.
    #[serde(default = "default_fine_margin")]
    pub fine_margin: u32,

    /// Data attribution returned alongside point results.
    #[serde(default = "default_attribution")]
    pub attribution: Vec<String>,
}

const fn default_max_extent() -> u32 {
    DEFAULT_MAX_EXTENT
}

const fn default_fine_margin() -> u32 {
    DEFAULT_FINE_MARGIN
}

fn default_attribution() -> Vec<String> {
    vec![
        "Contains OS data © Crown copyright and database right".to_string(),
        "Contains Royal Mail data © Royal Mail copyright and database right".to_string(),
        "Contains National Statistics data © Crown copyright and database right".to_string(),
    ]
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_extent: default_max_extent(),
            fine_margin: default_fine_margin(),
            attribution: default_attribution(),
        }
    }
}

/// Parses `"min_e,min_n,max_e,max_n"`.
///
/// Fields are trimmed before parsing.
///
/// # Errors
///
/// * [`QueryError::InvalidFormat`] if there are not exactly four fields
/// * [`QueryError::InvalidValue`] if a field is not a `u32`
/// * [`QueryError::InvalidRange`] if a minimum exceeds its maximum
pub fn parse_bbox(raw: &str) -> Result<BoundingBox, QueryError> {
    let fields: Vec<&str> = raw.split(',').collect();
    if fields.len() != 4 {
        return Err(QueryError::InvalidFormat);
    }

    let mut values = [0u32; 4];
    for (value, field) in values.iter_mut().zip(&fields) {
        *value = field
            .trim()
            .parse()
            .map_err(|_| QueryError::InvalidValue((*field).to_string()))?;
    }

    let [min_easting, min_northing, max_easting, max_northing] = values;
    let bbox = BoundingBox::new(min_easting, min_northing, max_easting, max_northing);

    if !bbox.is_well_ordered() {
        return Err(QueryError::InvalidRange);
    }

    Ok(bbox)
}

/// `Coarse` if either side exceeds `max_extent`, otherwise `Fine`.
#[must_use]
pub const fn classify_tier(bbox: &BoundingBox, max_extent: u32) -> Tier {
    if bbox.width() > max_extent || bbox.height() > max_extent {
        Tier::Coarse
    } else {
        Tier::Fine
    }
}

/// Pushes every edge of `bbox` out by `margin`, clamped to the grid.
///
/// The wider window catches postcodes whose centroid is just outside the
/// requested area but whose polygon overlaps it. Returned geometry is not
/// clipped back to the original box.
#[must_use]
pub const fn expand_for_fine_tier(bbox: &BoundingBox, margin: u32) -> BoundingBox {
    bbox.expanded(margin)
}
