use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::aggregator::DEFAULT_SHARDS;
use crate::module::DEFAULT_PROVIDER;

/// Storage backend configuration
///
/// The selected variant names the storage provider the module registry
/// binds to the persistence capability.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-process rows (no persistence across restarts)
    Memory,

    /// SQLite database
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl StorageConfig {
    /// Name of the storage provider this configuration enables
    pub fn provider(&self) -> &'static str {
        match self {
            StorageConfig::Memory => "memory",
            StorageConfig::Sqlite { .. } => "sqlite",
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./apm-collector.db")
}

/// Flush and retention scheduling
#[derive(Debug, Clone, serde::Deserialize)]
pub struct FlushConfig {
    #[serde(default = "default_flush_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound for every single storage call
    #[serde(default = "default_storage_timeout_secs")]
    pub storage_timeout_secs: u64,

    /// Aggregates older than this are purged by the retention sweep
    #[serde(default = "default_retention_minutes")]
    pub retention_minutes: u64,

    #[serde(default = "default_retention_interval_secs")]
    pub retention_interval_secs: u64,

    /// Consecutive cycles with unavailable storage before warning
    #[serde(default = "default_unavailable_alert_threshold")]
    pub unavailable_alert_threshold: u64,
}

impl FlushConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs.max(1))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_minutes * 60)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs.max(1))
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_flush_interval_secs(),
            storage_timeout_secs: default_storage_timeout_secs(),
            retention_minutes: default_retention_minutes(),
            retention_interval_secs: default_retention_interval_secs(),
            unavailable_alert_threshold: default_unavailable_alert_threshold(),
        }
    }
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_storage_timeout_secs() -> u64 {
    10
}

fn default_retention_minutes() -> u64 {
    7 * 24 * 60
}

fn default_retention_interval_secs() -> u64 {
    3600
}

fn default_unavailable_alert_threshold() -> u64 {
    5
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_shards")]
    pub shards: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
        }
    }
}

fn default_shards() -> usize {
    DEFAULT_SHARDS
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiSettings {
    pub bind_addr: SocketAddr,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub flush: FlushConfig,

    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Stats / health API (optional - disabled when absent)
    pub api: Option<ApiSettings>,
}

impl Config {
    /// Provider names enabled by this configuration
    pub fn active_providers(&self) -> Vec<String> {
        vec![
            DEFAULT_PROVIDER.to_string(),
            self.storage.provider().to_string(),
        ]
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
