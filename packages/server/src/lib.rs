#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for postcode points and polygons.
//!
//! Loads the Code-Point Open index into memory at startup, then serves
//! window queries for postcode centroids and the unit or district polygons
//! covering a bounding box. Polygon files are decompressed on demand and
//! cached for a few minutes.

pub mod config;
mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use postcode_polygons_boundaries::{CachedPolygonRepository, FileFeatureSource};
use postcode_polygons_query::PostcodeSearch;
use postcode_polygons_spatial::{IndexBuildError, PointIndex, RTreePointIndex};

pub use config::{ConfigError, ServerConfig};

/// Errors that stop the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The spatial index could not be built.
    #[error("Failed to build spatial index: {0}")]
    Index(#[from] IndexBuildError),

    /// The HTTP server failed to bind or run.
    #[error("HTTP server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state.
pub struct AppState {
    /// Point and polygon search over the loaded index.
    pub search: PostcodeSearch,
}

/// Registers the API routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/healthz", web::get().to(handlers::health)).service(
        web::scope("/v1/postcode")
            .route("/codepoints", web::get().to(handlers::codepoints))
            .route("/polygons", web::get().to(handlers::polygons)),
    );
}

/// Builds the index and polygon store described by `config`.
///
/// # Errors
///
/// Returns [`ServerError::Index`] if the Code-Point source is missing or
/// malformed. The server must not start with a partial index.
pub fn build_state(config: &ServerConfig) -> Result<AppState, ServerError> {
    log::info!("Loading Code-Point data from {}", config.codepoint_path.display());
    let index = RTreePointIndex::from_codepoint(&config.codepoint_path)?;
    log::info!("Code-Point spatial index created with {} entries", index.len());

    log::info!(
        "Serving {} polygons from {}",
        config.compression,
        config.polygon_dir.display()
    );
    let repository = CachedPolygonRepository::new(
        FileFeatureSource::new(&config.polygon_dir, config.compression),
        config.cache.clone(),
    );
    if repository.start_sweeper().is_none() {
        log::info!("Polygon cache sweep disabled");
    }

    Ok(AppState {
        search: PostcodeSearch::new(Arc::new(index), Arc::new(repository), config.query.clone()),
    })
}

/// Starts the API server.
///
/// This is a regular async function; the caller provides the runtime
/// (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an error if the index cannot be built or the HTTP server fails
/// to bind.
#[allow(clippy::future_not_send)]
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let state = web::Data::new(build_state(&config)?);

    let ServerConfig { bind_addr, port, .. } = config;
    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Compress::default())
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await?;

    Ok(())
}
