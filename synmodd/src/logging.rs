//! Console and file logging.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{DaemonError, LoggingConfig};

/// Keeps the file writer alive; logs are flushed when it is dropped.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// `RUST_LOG` wins over the configured level when set.
fn filter(cfg: &LoggingConfig) -> Result<EnvFilter, DaemonError> {
    match EnvFilter::try_from_default_env() {
        Ok(f) => Ok(f),
        Err(_) => EnvFilter::try_new(cfg.log_level.to_ascii_lowercase())
            .map_err(|e| DaemonError::Logging(e.to_string())),
    }
}

pub fn init_logging(cfg: &LoggingConfig, log_dir: &Path) -> Result<LoggingGuard, DaemonError> {
    let mut layers = Vec::new();
    let mut file_guard = None;

    if cfg.enable_console {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_filter(filter(cfg)?)
            .boxed();
        layers.push(console_layer);
    }

    if cfg.enable_file {
        std::fs::create_dir_all(log_dir).map_err(|source| DaemonError::Io {
            path: log_dir.to_path_buf(),
            source,
        })?;
        let appender = tracing_appender::rolling::never(log_dir, &cfg.log_file);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_filter(filter(cfg)?)
            .boxed();
        layers.push(file_layer);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| DaemonError::Logging(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
