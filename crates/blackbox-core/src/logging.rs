//! Structured logging for blackbox.
//!
//! Built on `tracing` with two output formats and an optional log file:
//!
//! - **Pretty**: human-friendly output for interactive runs
//! - **JSON**: machine-parseable lines for CI and ops
//!
//! Initialize once at startup; the `RUST_LOG` environment variable
//! overrides the configured level. Correlation fields used across the
//! engine: `recording_id`, `correlation_id`, `stream_id`, `segment_index`.

use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error).
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// Optional log file; stderr when unset.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Errors from logging initialization.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Install the global tracing subscriber.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|_| LogError::InvalidLevel(config.level.clone()))?;

    match (&config.file, config.format) {
        (Some(path), format) => {
            let file = std::sync::Arc::new(
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?,
            );
            let builder = fmt()
                .with_env_filter(filter)
                .with_writer(file)
                .with_ansi(false);
            match format {
                LogFormat::Json => builder.json().try_init(),
                LogFormat::Pretty => builder.try_init(),
            }
        }
        (None, LogFormat::Json) => fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .json()
            .try_init(),
        (None, LogFormat::Pretty) => fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init(),
    }
    .map_err(|_| LogError::AlreadyInitialized)?;

    let _ = LOGGING_INITIALIZED.set(true);
    Ok(())
}
