use std::path::{Path, PathBuf};
use std::time::Duration;

use bucket_sync::DEFAULT_PAYLOAD_LIMIT;
use bucket_sync_client::SyncConfig;
use serde::Deserialize;

/// Errors loading an agent config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config {path}: {field} must be greater than zero")]
    Zero {
        path: PathBuf,
        field: &'static str,
    },
}

/// Settings of `bucket-sync agent`, read from TOML.
///
/// ```toml
/// server = "http://127.0.0.1:8787"
/// db = "client.db"
/// buckets = ["teams", "brackets"]
/// protection_window_ms = 120000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub server: String,
    pub db: PathBuf,
    pub buckets: Vec<String>,
    pub push_interval_ms: u64,
    pub pull_interval_ms: u64,
    pub protection_window_ms: u64,
    pub payload_limit: usize,
    pub request_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let sync = SyncConfig::default();
        Self {
            server: "http://127.0.0.1:8787".to_string(),
            db: PathBuf::from("bucket-sync.db"),
            buckets: Vec::new(),
            push_interval_ms: sync.push_interval.as_millis() as u64,
            pull_interval_ms: sync.pull_interval.as_millis() as u64,
            protection_window_ms: sync.protection_window.as_millis() as u64,
            payload_limit: DEFAULT_PAYLOAD_LIMIT,
            request_timeout_ms: sync.request_timeout.as_millis() as u64,
        }
    }
}

impl AgentConfig {
    /// Read a TOML file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        match config.zero_field() {
            Some(field) => Err(ConfigError::Zero {
                path: path.to_path_buf(),
                field,
            }),
            None => Ok(config),
        }
    }

    /// First timing field set to zero, if any.
    fn zero_field(&self) -> Option<&'static str> {
        [
            ("push_interval_ms", self.push_interval_ms),
            ("pull_interval_ms", self.pull_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ]
        .into_iter()
        .find_map(|(field, ms)| (ms == 0).then_some(field))
    }

    /// Engine policy for these settings.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            buckets: self.buckets.clone(),
            push_interval: Duration::from_millis(self.push_interval_ms),
            pull_interval: Duration::from_millis(self.pull_interval_ms),
            protection_window: Duration::from_millis(self.protection_window_ms),
            payload_limit: self.payload_limit,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}
