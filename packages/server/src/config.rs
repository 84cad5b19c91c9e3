//! Server configuration.
//!
//! Settings come from an optional TOML file, then the `BIND_ADDR`, `PORT`,
//! `CODEPOINT_PATH` and `POLYGON_DIR` environment variables. Every field has
//! a default, so an empty file (or no file) is a valid configuration.

use std::path::{Path, PathBuf};

use postcode_polygons_boundaries::{CacheConfig, Compression};
use postcode_polygons_query::QueryConfig;
use serde::{Deserialize, Serialize};

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Config file path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`ServerConfig`].
    #[error("invalid config {path}: {source}")]
    Parse {
        /// Config file path.
        path: String,
        /// Underlying parse error.
        source: toml::de::Error,
    },

    /// An environment override has an unusable value.
    #[error("invalid value '{value}' for {name}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },
}

/// Full server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Code-Point Open zip archive or plain CSV.
    #[serde(default = "default_codepoint_path")]
    pub codepoint_path: PathBuf,

    /// Root of the `units/` and `districts/` polygon directories.
    #[serde(default = "default_polygon_dir")]
    pub polygon_dir: PathBuf,

    #[serde(default)]
    pub compression: Compression,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8080
}

fn default_codepoint_path() -> PathBuf {
    PathBuf::from("data/codepo_gb.zip")
}

fn default_polygon_dir() -> PathBuf {
    PathBuf::from("data/postcodes")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            codepoint_path: default_codepoint_path(),
            polygon_dir: default_polygon_dir(),
            compression: Compression::default(),
            query: QueryConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parses a TOML document. `origin` names the source in errors.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is invalid.
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::de::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Loads `path` (if given) and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an
    /// environment override is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                log::info!("Reading configuration from {}", path.display());
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml_str(&content, &path.display().to_string())?
            }
            None => Self::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies `BIND_ADDR`, `PORT`, `CODEPOINT_PATH` and `POLYGON_DIR` as
    /// returned by `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] if `PORT` is not a valid port.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&'static str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(bind_addr) = lookup("BIND_ADDR") {
            self.bind_addr = bind_addr;
        }

        if let Some(port) = lookup("PORT") {
            self.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "PORT",
                value: port,
            })?;
        }

        if let Some(path) = lookup("CODEPOINT_PATH") {
            self.codepoint_path = PathBuf::from(path);
        }

        if let Some(dir) = lookup("POLYGON_DIR") {
            self.polygon_dir = PathBuf::from(dir);
        }

        Ok(())
    }
}
