//! Point and polygon search over a shared index and polygon store.

use std::sync::Arc;

use geojson::FeatureCollection;
use postcode_polygons_boundaries::{PolygonError, PolygonRepository, collect_features};
use postcode_polygons_spatial::PointIndex;
use postcode_polygons_spatial_models::CodePoint;

use crate::{QueryConfig, QueryError, Tier, classify_tier, expand_for_fine_tier, parse_bbox, resolve_units};

/// Errors returned by [`PostcodeSearch`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    /// The client's bounding box was rejected.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A polygon file exists but could not be loaded.
    #[error(transparent)]
    Polygons(#[from] PolygonError),
}

impl SearchError {
    /// Returns `true` if the caller is at fault.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Query(_))
    }
}

/// Query entry point shared by all request handlers.
pub struct PostcodeSearch {
    index: Arc<dyn PointIndex>,
    polygons: Arc<dyn PolygonRepository>,
    config: QueryConfig,
}

impl PostcodeSearch {
    #[must_use]
    pub fn new(index: Arc<dyn PointIndex>, polygons: Arc<dyn PolygonRepository>, config: QueryConfig) -> Self {
        Self {
            index,
            polygons,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Number of postcodes in the index.
    #[must_use]
    pub fn indexed_points(&self) -> usize {
        self.index.len()
    }

    /// Returns every postcode centroid inside `raw_bbox`.
    ///
    /// Boxes larger than the configured extent are rejected before the
    /// index is consulted.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Query`] if the box is malformed or too large.
    pub fn search_points(&self, raw_bbox: &str) -> Result<Vec<CodePoint>, SearchError> {
        let bbox = parse_bbox(raw_bbox)?;

        let max_extent = self.config.max_extent;
        if bbox.width() > max_extent || bbox.height() > max_extent {
            return Err(QueryError::BBoxTooLarge { max_extent }.into());
        }

        Ok(self.index.search(&bbox))
    }

    /// Returns the unit or district polygons covering `raw_bbox`.
    ///
    /// Small boxes are served with per-postcode polygons over a slightly
    /// enlarged window; large boxes fall back to district polygons.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Query`] for a malformed box and
    /// [`SearchError::Polygons`] if any needed polygon file is corrupt or
    /// unreadable. Missing files are not errors.
    pub async fn search_polygons(&self, raw_bbox: &str) -> Result<FeatureCollection, SearchError> {
        let bbox = parse_bbox(raw_bbox)?;
        let tier = classify_tier(&bbox, self.config.max_extent);

        let window = match tier {
            Tier::Fine => expand_for_fine_tier(&bbox, self.config.fine_margin),
            Tier::Coarse => bbox,
        };

        let selection = resolve_units(self.index.as_ref(), &window, tier);
        log::debug!(
            "Polygon search {window} ({tier}): {} districts, {} requested",
            selection.districts.len(),
            selection.requested.len()
        );

        let collection = collect_features(
            self.polygons.as_ref(),
            tier.target(),
            &selection.districts,
            &selection.requested,
        )
        .await?;

        Ok(collection)
    }
}
