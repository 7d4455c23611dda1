//! Episode store configuration.
//!
//! Every field has a serde default, so an empty TOML document is a valid
//! configuration.  `data_dir = None` keeps everything in memory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mnemos_index::cache::{DEFAULT_PRESSURE_EVICTION_RATIO, DEFAULT_PRESSURE_THRESHOLD};
use mnemos_index::time_index::{DEFAULT_ORDER, MIN_ORDER};
use mnemos_index::{BackendPreference, Metric, RetryPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a [`MemoryConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Tuning knobs for an [`EpisodeStore`](crate::EpisodeStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Directory holding `episodes.db`, `graph.db`, `vectors.bin` and
    /// `time_index.json`.  `None` keeps all state in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Embedding dimension every episode must match.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default)]
    pub metric: Metric,

    /// `auto`, `native` or `portable`.
    #[serde(default)]
    pub backend: BackendPreference,

    /// B+ tree order of the time index.
    #[serde(default = "default_btree_order")]
    pub btree_order: usize,

    /// Episodes kept in the read cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// System memory usage ratio above which the cache sheds entries.
    #[serde(default = "default_pressure_threshold")]
    pub memory_pressure_threshold: f64,

    /// Fraction of cache capacity shed per pressure event.
    #[serde(default = "default_pressure_eviction_ratio")]
    pub pressure_eviction_ratio: f64,

    /// Pending transactions older than this are force-rolled-back.
    #[serde(default = "default_transaction_max_age_secs")]
    pub transaction_max_age_secs: u64,

    /// Period of the abandoned-transaction sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// L2-normalise embeddings on the way in when the metric is cosine.
    #[serde(default = "default_true")]
    pub normalize_embeddings: bool,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_dimension() -> usize {
    384
}
fn default_btree_order() -> usize {
    DEFAULT_ORDER
}
fn default_cache_capacity() -> usize {
    1000
}
fn default_pressure_threshold() -> f64 {
    DEFAULT_PRESSURE_THRESHOLD
}
fn default_pressure_eviction_ratio() -> f64 {
    DEFAULT_PRESSURE_EVICTION_RATIO
}
fn default_transaction_max_age_secs() -> u64 {
    300
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            dimension: default_dimension(),
            metric: Metric::default(),
            backend: BackendPreference::default(),
            btree_order: default_btree_order(),
            cache_capacity: default_cache_capacity(),
            memory_pressure_threshold: default_pressure_threshold(),
            pressure_eviction_ratio: default_pressure_eviction_ratio(),
            transaction_max_age_secs: default_transaction_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            normalize_embeddings: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl MemoryConfig {
    /// In-memory configuration for `dimension`-sized embeddings.
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn transaction_max_age(&self) -> Duration {
        Duration::from_secs(self.transaction_max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimension == 0 {
            return Err(ConfigError::Invalid("dimension must be positive".into()));
        }
        if self.btree_order < MIN_ORDER {
            return Err(ConfigError::Invalid(format!(
                "btree_order must be at least {MIN_ORDER}, got {}",
                self.btree_order
            )));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid("cache_capacity must be positive".into()));
        }
        for (name, v) in [
            ("memory_pressure_threshold", self.memory_pressure_threshold),
            ("pressure_eviction_ratio", self.pressure_eviction_ratio),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Invalid(format!("{name} must be within [0, 1], got {v}")));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be positive".into()));
        }
        Ok(())
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Read `path`, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut cfg = Self::from_toml_str(&raw)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `MNEMOS_*` environment variable overrides.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `MNEMOS_DATA_DIR` | `data_dir` |
    /// | `MNEMOS_DIMENSION` | `dimension` |
    /// | `MNEMOS_BACKEND` | `backend` |
    /// | `MNEMOS_CACHE_CAPACITY` | `cache_capacity` |
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MNEMOS_DATA_DIR")
            && !v.is_empty()
        {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("MNEMOS_DIMENSION")
            && let Ok(dim) = v.parse::<usize>()
            && dim > 0
        {
            self.dimension = dim;
        }
        if let Ok(v) = std::env::var("MNEMOS_BACKEND")
            && let Some(pref) = BackendPreference::parse(&v)
        {
            self.backend = pref;
        }
        if let Ok(v) = std::env::var("MNEMOS_CACHE_CAPACITY")
            && let Ok(cap) = v.parse::<usize>()
            && cap > 0
        {
            self.cache_capacity = cap;
        }
    }
}
