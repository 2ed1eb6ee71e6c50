//! Logging initialization.
//!
//! Builds an [`observability::LogConfig`] from [`Config`] and [`Paths`] and
//! installs it. Structured JSONL goes to `~/.measure/logs/measure.jsonl`;
//! the level comes from `RUST_LOG` or the configured default.

use crate::{Config, CoreResult, Paths};

/// Service name written into every log line.
const SERVICE_NAME: &str = "measure";

/// Initialize the logging system.
///
/// # Example
///
/// ```ignore
/// init_logging(&config, &paths, true)?;
/// tracing::info!("measurement core started");
/// ```
pub fn init_logging(config: &Config, paths: &Paths, also_stderr: bool) -> CoreResult<()> {
    observability::init_with_config(log_config(config, paths, also_stderr))?;
    Ok(())
}

fn log_config(config: &Config, paths: &Paths, also_stderr: bool) -> observability::LogConfig {
    observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: parse_level(&config.log_level).to_string().to_lowercase(),
        log_path: Some(paths.log_file()),
        also_stderr,
    }
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoreError;
    use std::path::PathBuf;

    #[test]
    fn parse_level_all_variants() {
        assert_eq!(parse_level("trace"), tracing::Level::TRACE);
        assert_eq!(parse_level("debug"), tracing::Level::DEBUG);
        assert_eq!(parse_level("info"), tracing::Level::INFO);
        assert_eq!(parse_level("warn"), tracing::Level::WARN);
        assert_eq!(parse_level("warning"), tracing::Level::WARN);
        assert_eq!(parse_level("ERROR"), tracing::Level::ERROR);
    }

    #[test]
    fn parse_level_unknown_defaults_to_info() {
        assert_eq!(parse_level(""), tracing::Level::INFO);
        assert_eq!(parse_level("verbose"), tracing::Level::INFO);
    }

    #[test]
    fn log_config_uses_paths_and_normalized_level() {
        let paths = Paths::with_base_dir(PathBuf::from("/tmp/measure-logs"));
        let mut config = Config::default();
        config.log_level = "WARNING".to_string();

        let log_config = log_config(&config, &paths, false);
        assert_eq!(log_config.service_name, "measure");
        assert_eq!(log_config.default_level, "warn");
        assert_eq!(log_config.log_path, Some(paths.log_file()));
        assert!(!log_config.also_stderr);
    }

    #[test]
    fn init_logging_twice_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let config = Config::default();

        let _ = init_logging(&config, &paths, false);
        assert!(matches!(
            init_logging(&config, &paths, false),
            Err(CoreError::Logging(_))
        ));
    }
}
