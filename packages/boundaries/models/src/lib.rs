#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for the postcode polygon store.
//!
//! Polygon files live at `<base>/<target>/<district>.geojson.<ext>`. This
//! crate defines the `target` and `ext` parts of that layout plus the cache
//! settings, without pulling in any I/O.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Which family of polygon files to read.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PolygonTarget {
    /// Per-postcode polygons, one file per district.
    Units,
    /// Per-district polygons, one file per district.
    Districts,
}

impl PolygonTarget {
    /// The value written to a feature's `type` property by data prep.
    #[must_use]
    pub const fn feature_type(self) -> &'static str {
        match self {
            Self::Units => "unit",
            Self::Districts => "district",
        }
    }
}

/// Compression applied to stored feature collections.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Compression {
    /// gzip (`.gz`).
    #[default]
    Gzip,
    /// Zstandard (`.zst`).
    Zstd,
    /// bzip2 (`.bz2`), the format of polygon sets prepared by older tooling.
    Bzip2,
}

impl Compression {
    /// File extension without the leading dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Gzip => "gz",
            Self::Zstd => "zst",
            Self::Bzip2 => "bz2",
        }
    }
}

/// Returns the path of the polygon file for `district`.
#[must_use]
pub fn polygon_path(base: &Path, target: PolygonTarget, district: &str, compression: Compression) -> PathBuf {
    base.join(target.as_ref())
        .join(format!("{district}.geojson.{}", compression.extension()))
}

/// Expiry policy for the decompressed polygon cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a loaded collection is served before it is reloaded.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Interval of the background task that drops expired entries.
    /// `0` disables the sweep; expired entries are still replaced on read.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

const fn default_ttl_secs() -> u64 {
    5 * 60
}

const fn default_sweep_interval_secs() -> u64 {
    10 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    /// Entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Sweep period, or `None` when sweeping is disabled.
    #[must_use]
    pub const fn sweep_interval(&self) -> Option<Duration> {
        if self.sweep_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.sweep_interval_secs))
        }
    }
}
