//! Daemon configuration: `config.json` in the data directory, then
//! environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use synmod::config::NetworkConfig;
use synmod::error::{ConfigError, SynmodError};

pub const NETWORK_ID_ENV: &str = "SYNMOD_NETWORK_ID";
pub const LOG_LEVEL_ENV: &str = "SYNMOD_LOG_LEVEL";
pub const BIND_ENV: &str = "SYNMOD_BIND";

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("could not determine data directory")]
    NoDataDir,

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Network(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] SynmodError),

    #[error("training.{0} must be positive")]
    ZeroInterval(&'static str),

    #[error("logging: {0}")]
    Logging(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Committed steps between fire-and-forget state saves.
    pub save_interval: u64,
    /// Committed steps between metrics flushes.
    pub flush_interval: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            save_interval: 10,
            flush_interval: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
    pub log_file: String,
    pub enable_console: bool,
    pub enable_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: "synmodd.log".to_string(),
            enable_console: true,
            enable_file: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub network_id: String,
    pub collection_name: String,
    pub performance_collection: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            network_id: "default".to_string(),
            collection_name: "neural_network_states".to_string(),
            performance_collection: "performance_metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:9877".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub network: NetworkConfig,
    pub training: TrainingConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

impl DaemonConfig {
    /// Read `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, DaemonError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| DaemonError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| DaemonError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load, apply process environment overrides, validate.
    pub fn resolve(path: &Path) -> Result<Self, DaemonError> {
        let mut cfg = Self::load(path)?;
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(id) = set(NETWORK_ID_ENV) {
            self.storage.network_id = id;
        }
        if let Some(level) = set(LOG_LEVEL_ENV) {
            self.logging.log_level = level.to_ascii_lowercase();
        }
        if let Some(bind) = set(BIND_ENV) {
            self.server.bind = bind;
        }
    }

    pub fn validate(&self) -> Result<(), DaemonError> {
        self.network.validate()?;
        if self.training.save_interval == 0 {
            return Err(DaemonError::ZeroInterval("save_interval"));
        }
        if self.training.flush_interval == 0 {
            return Err(DaemonError::ZeroInterval("flush_interval"));
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), DaemonError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| DaemonError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| DaemonError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
