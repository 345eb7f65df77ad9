//! Coordinator configuration.
//!
//! Loaded from `config.yaml` (if present) layered with `LIGATURE_*`
//! environment variables, the way the teacher framework's `Config::load`
//! layers file and environment sources.

use serde::Deserialize;

/// Environment variable prefix for configuration overrides.
pub const CONFIG_ENV_PREFIX: &str = "LIGATURE";
/// Default configuration file name, read from the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable naming an explicit config file path.
pub const CONFIG_ENV_VAR: &str = "LIGATURE_CONFIG";

#[derive(Debug, Clone, thiserror::Error)]
#[error("config error: {0}")]
pub struct ConfigError(String);

/// Top-level coordinator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub tenant: TenantConfig,
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            tenant: TenantConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Sources, in order of increasing priority:
    /// 1. `config.yaml` in the current directory (if present)
    /// 2. the file named by `path`, if given
    /// 3. the file named by `LIGATURE_CONFIG`, if set
    /// 4. `LIGATURE_*` environment variables (`__` separates nested keys)
    pub fn load(path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder =
            ConfigLib::builder().add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }
        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let built = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError(e.to_string()))?;

        built.try_deserialize().map_err(|e| ConfigError(e.to_string()))
    }

    pub fn for_test() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7070,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory tenant sqlite databases and snapshot trees live under.
    pub data_root: String,
    /// Number of recent snapshot versions kept hot per tenant (spec §4.5
    /// Open Question resolution: latest + 4 prior).
    pub snapshot_retention: usize,
    /// Mutations accumulated since the last snapshot before a refresh is
    /// triggered.
    pub snapshot_mutation_batch: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: "./data".to_string(),
            snapshot_retention: 5,
            snapshot_mutation_batch: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    /// Seconds of no activity before a `READY` coordinator moves to
    /// `DRAINING` and is evicted.
    pub idle_eviction_secs: u64,
    /// Interval the server expects a subscriber `PING` within, before
    /// treating the connection as dead.
    pub subscriber_ping_interval_secs: u64,
    /// Maximum buffered broadcast messages per subscriber before it is
    /// disconnected with `LAGGED`.
    pub backpressure_high_water_mark: usize,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            idle_eviction_secs: 600,
            subscriber_ping_interval_secs: 30,
            backpressure_high_water_mark: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_secs: 60,
        }
    }
}
