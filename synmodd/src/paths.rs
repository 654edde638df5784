//! Cross-platform application paths

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::DaemonError;

/// Overrides the platform data directory.
pub const DATA_DIR_ENV: &str = "SYNMOD_DATA_DIR";

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, DaemonError> {
        let data_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => Self::get_data_dir()?,
        };
        Self::at(data_dir)
    }

    /// Use an explicit data directory, creating it if needed.
    pub fn at(data_dir: impl Into<PathBuf>) -> Result<Self, DaemonError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|source| DaemonError::Io {
            path: data_dir.clone(),
            source,
        })?;
        Ok(Self { data_dir })
    }

    fn get_data_dir() -> Result<PathBuf, DaemonError> {
        let base = dirs::data_dir().ok_or(DaemonError::NoDataDir)?;
        Ok(base.join("synmod"))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Directory of one store collection.
    pub fn collection_dir(&self, collection: &str) -> PathBuf {
        self.data_dir.join(collection)
    }
}
