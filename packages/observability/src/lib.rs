//! # Observability
//!
//! Logging layer for the measurement core.
//!
//! ## Design Philosophy
//!
//! Crates are **log producers**. They use the standard `tracing` macros and
//! never decide where logs go. The entry point calls [`init`] or
//! [`init_with_config`] once at startup; everything else is configuration.
//!
//! When a log path is configured, structured JSONL is appended to that file
//! (one object per line, flushed per line) so it can be followed with
//! `tail -f measure.jsonl | jq`. A compact stderr layer can be enabled for
//! foreground runs.
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "measure".into(),
//!     default_level: "debug".into(),
//!     log_path: Some(paths.log_file()),
//!     also_stderr: true,
//! })?;
//!
//! tracing::info!("measurement core started");
//! ```

mod json_layer;
mod sink;

use std::path::PathBuf;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use json_layer::{JsonLayer, LogEntry};
pub use sink::{CentralLogWriter, WriterFactory};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every JSONL line.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional JSONL log file. No file layer is installed when `None`.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: true,
        }
    }
}

/// Errors raised while installing the global subscriber.
#[derive(Error, Debug)]
pub enum InitError {
    /// The JSONL file could not be opened.
    #[error("failed to open log file: {0}")]
    LogFile(#[source] std::io::Error),
    /// A global subscriber was already installed.
    #[error("subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Initialize logging with default settings and the given service name.
pub fn init(service_name: &str) -> Result<(), InitError> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialize logging with custom configuration.
///
/// Returns [`InitError::AlreadyInitialized`] when called twice in the same
/// process, which lets tests call it without tearing down each other.
pub fn init_with_config(config: LogConfig) -> Result<(), InitError> {
    let json_layer = match &config.log_path {
        Some(path) => {
            let writer = CentralLogWriter::new(path).map_err(InitError::LogFile)?;
            let layer = JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer));
            Some(layer.with_filter(env_filter(&config.default_level)))
        }
        None => None,
    };

    let stderr_layer = if config.also_stderr {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_writer(std::io::stderr)
                .with_filter(env_filter(&config.default_level)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| InitError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        log_path = ?config.log_path,
        "observability initialized"
    );
    Ok(())
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
