#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the postcode polygons server.
//!
//! Polygon responses are plain `GeoJSON` and are not modelled here.

use postcode_polygons_spatial_models::CodePoint;
use serde::{Deserialize, Serialize};

/// Response body of `GET /v1/postcode/codepoints`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCodePointResponse {
    /// Postcode centroids inside the requested box.
    pub results: Vec<CodePoint>,
    /// Data attribution the client must display.
    pub attribution: Vec<String>,
}

/// Query parameters shared by the search endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct BboxQueryParams {
    /// Bounding box as `min_easting,min_northing,max_easting,max_northing`.
    pub bbox: Option<String>,
}

/// Error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
    /// Postcodes held by the spatial index.
    pub indexed_points: usize,
}
