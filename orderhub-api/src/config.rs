//! Service Configuration
//!
//! Configuration is read from a YAML file named by `ORDERHUB_CONFIG_PATH`
//! (defaults when unset), then overridden field by field from environment
//! variables, then validated. Every section has sensible defaults for local
//! development, so a partial file is fine.
//!
//! Environment variables:
//! - `ORDERHUB_HTTP_ADDRESS`: listen address (default: localhost:8080)
//! - `ORDERHUB_HTTP_REQUEST_TIMEOUT_SECS`: per-request deadline (default: 10)
//! - `ORDERHUB_DB_HOST`, `ORDERHUB_DB_PORT`, `ORDERHUB_DB_NAME`,
//!   `ORDERHUB_DB_USER`, `ORDERHUB_DB_PASSWORD`, `ORDERHUB_DB_POOL_SIZE`
//! - `ORDERHUB_CACHE_CAPACITY`: recency cache capacity (default: 100)
//! - `ORDERHUB_QUEUE_DEPTH`: bounded ingestion queue depth (default: 1024)
//! - `ORDERHUB_LOG_FORMAT`: `json` or `pretty` (default: json)

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DbConfig;
use crate::telemetry::TelemetryConfig;

/// Environment variable naming the YAML configuration file.
pub const CONFIG_PATH_ENV: &str = "ORDERHUB_CONFIG_PATH";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpServerConfig {
    /// Listen address, `host:port`.
    pub address: String,
    /// Deadline for handling one request, including any wait on the queue.
    pub request_timeout_secs: u64,
}

impl HttpServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Ingestion queue settings. `topic` and `group_id` label the in-process
/// queue in logs; the wire transport itself is not configurable here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub topic: String,
    pub group_id: String,
    pub queue_depth: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            topic: "orders".to_string(),
            group_id: "orderhub".to_string(),
            queue_depth: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Fixed capacity of the recency cache; also the warm-up window.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

// ============================================================================
// APP CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http_server: HttpServerConfig,
    pub database: DbConfig,
    pub broker: BrokerConfig,
    pub cache: CacheConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load from `ORDERHUB_CONFIG_PATH` and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_with(path.as_deref(), |key| std::env::var(key).ok())
    }

    /// Load from an optional file and an arbitrary variable lookup.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `ORDERHUB_*` overrides. Unset variables leave the field alone;
    /// unparseable values are rejected.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("ORDERHUB_HTTP_ADDRESS") {
            self.http_server.address = address;
        }
        if let Some(raw) = lookup("ORDERHUB_HTTP_REQUEST_TIMEOUT_SECS") {
            self.http_server.request_timeout_secs =
                parse_override("ORDERHUB_HTTP_REQUEST_TIMEOUT_SECS", raw)?;
        }
        if let Some(host) = lookup("ORDERHUB_DB_HOST") {
            self.database.host = host;
        }
        if let Some(raw) = lookup("ORDERHUB_DB_PORT") {
            self.database.port = parse_override("ORDERHUB_DB_PORT", raw)?;
        }
        if let Some(dbname) = lookup("ORDERHUB_DB_NAME") {
            self.database.dbname = dbname;
        }
        if let Some(user) = lookup("ORDERHUB_DB_USER") {
            self.database.user = user;
        }
        if let Some(password) = lookup("ORDERHUB_DB_PASSWORD") {
            self.database.password = password;
        }
        if let Some(raw) = lookup("ORDERHUB_DB_POOL_SIZE") {
            self.database.max_size = parse_override("ORDERHUB_DB_POOL_SIZE", raw)?;
        }
        if let Some(raw) = lookup("ORDERHUB_CACHE_CAPACITY") {
            self.cache.capacity = parse_override("ORDERHUB_CACHE_CAPACITY", raw)?;
        }
        if let Some(raw) = lookup("ORDERHUB_QUEUE_DEPTH") {
            self.broker.queue_depth = parse_override("ORDERHUB_QUEUE_DEPTH", raw)?;
        }
        if let Some(raw) = lookup("ORDERHUB_LOG_FORMAT") {
            self.telemetry.log_format = parse_override("ORDERHUB_LOG_FORMAT", raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http_server.address.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "http_server.address must not be empty".to_string(),
            ));
        }
        if self.http_server.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "http_server.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.database.max_size == 0 {
            return Err(ConfigError::Invalid(
                "database.max_size must be at least 1".to_string(),
            ));
        }
        if self.broker.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "broker.queue_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_override<T: FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value: raw })
}
