#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Standalone entry point for the postcode polygons API server.
//!
//! Reads an optional TOML config from `CONFIG_PATH`, applies environment
//! overrides, and serves until interrupted.

use std::path::PathBuf;

use postcode_polygons_server::{ServerConfig, run_server};

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config_path = std::env::var("CONFIG_PATH").ok().map(PathBuf::from);
    let config = ServerConfig::load(config_path.as_deref())?;

    run_server(config).await?;

    Ok(())
}
