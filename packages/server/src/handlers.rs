//! HTTP handler functions for the postcode API.

use actix_web::{HttpResponse, web};
use postcode_polygons_query::SearchError;
use postcode_polygons_server_models::{ApiCodePointResponse, ApiError, ApiHealth, BboxQueryParams};

use crate::AppState;

const GEOJSON_CONTENT_TYPE: &str = "application/geo+json";
const INTERNAL_ERROR: &str = "An internal server error occurred";

fn internal_error() -> HttpResponse {
    HttpResponse::InternalServerError().json(ApiError::new(INTERNAL_ERROR))
}

fn error_response(e: &SearchError, context: &str) -> HttpResponse {
    if e.is_client_error() {
        HttpResponse::BadRequest().json(ApiError::new(e.to_string()))
    } else {
        log::error!("{context} failed: {e}");
        internal_error()
    }
}

/// `GET /healthz`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        indexed_points: state.search.indexed_points(),
    })
}

/// `GET /v1/postcode/codepoints?bbox=...`
///
/// Returns postcode centroids inside a box of at most 5 km per side.
pub async fn codepoints(state: web::Data<AppState>, params: web::Query<BboxQueryParams>) -> HttpResponse {
    let bbox = params.bbox.as_deref().unwrap_or_default();

    match state.search.search_points(bbox) {
        Ok(results) => HttpResponse::Ok().json(ApiCodePointResponse {
            results,
            attribution: state.search.config().attribution.clone(),
        }),
        Err(e) => error_response(&e, "Code-Point search"),
    }
}

/// `GET /v1/postcode/polygons?bbox=...`
///
/// Returns a `GeoJSON` feature collection of unit polygons, or district
/// polygons when the box is larger than 5 km on either side.
pub async fn polygons(state: web::Data<AppState>, params: web::Query<BboxQueryParams>) -> HttpResponse {
    let bbox = params.bbox.as_deref().unwrap_or_default();

    match state.search.search_polygons(bbox).await {
        Ok(collection) => match serde_json::to_string(&collection) {
            Ok(body) => HttpResponse::Ok().content_type(GEOJSON_CONTENT_TYPE).body(body),
            Err(e) => {
                log::error!("Failed to serialize polygons: {e}");
                internal_error()
            }
        },
        Err(e) => error_response(&e, "Polygon search"),
    }
}
