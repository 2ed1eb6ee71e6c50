//! Configuration management for the measurement core.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default instrument model when none has been paired yet.
pub const DEFAULT_INSTRUMENT_MODEL: &str = "TS60";

/// Default number of read-only connections.
pub const DEFAULT_READER_CONNECTIONS: usize = 2;

/// Default SQLite busy timeout.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const DEFAULT_DATABASE_FILE: &str = "measurements.sqlite";

/// What the persistence engine does when the store cannot be opened as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPolicy {
    /// Fail closed: surface the corruption and leave the file untouched.
    #[default]
    Abort,
    /// Move the unreadable file aside and start from an empty store.
    Reset,
}

impl RecoveryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Reset => "reset",
        }
    }
}

impl FromStr for RecoveryPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "reset" => Ok(Self::Reset),
            other => Err(CoreError::Config(format!("unknown recovery policy: {}", other))),
        }
    }
}

/// Settings for the embedded store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// File name under the data directory.
    pub file_name: String,
    /// Number of read-only connections, each on its own thread.
    pub reader_connections: usize,
    /// How long a statement waits on a lock before failing.
    pub busy_timeout_ms: u64,
    /// Policy for stores that cannot be opened or migrated.
    pub recovery_policy: RecoveryPolicy,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            file_name: DEFAULT_DATABASE_FILE.to_string(),
            reader_connections: DEFAULT_READER_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            recovery_policy: RecoveryPolicy::Abort,
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Embedded store settings.
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Append every accepted raw reading to the journal before storing it.
    #[serde(default = "default_journal_enabled")]
    pub journal_enabled: bool,
    /// Model of the paired instrument (e.g. "TS60", "TS30").
    #[serde(default = "default_instrument_model")]
    pub instrument_model: String,
    /// Bluetooth MAC or host of the paired instrument.
    #[serde(default)]
    pub device_address: Option<String>,
}

fn default_journal_enabled() -> bool {
    true
}

fn default_instrument_model() -> String {
    DEFAULT_INSTRUMENT_MODEL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            database: DatabaseSettings::default(),
            journal_enabled: default_journal_enabled(),
            instrument_model: default_instrument_model(),
            device_address: None,
        }
    }
}

impl Config {
    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.database.reader_connections == 0 {
            return Err(CoreError::Config(
                "database.reader_connections must be at least 1".to_string(),
            ));
        }
        if self.database.file_name.trim().is_empty() {
            return Err(CoreError::Config("database.file_name is empty".to_string()));
        }
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) -> CoreResult<()> {
        if let Ok(log_level) = std::env::var("MEASURE_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(policy) = std::env::var("MEASURE_RECOVERY_POLICY") {
            self.database.recovery_policy = policy.parse()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.instrument_model, DEFAULT_INSTRUMENT_MODEL);
        assert_eq!(config.database.reader_connections, DEFAULT_READER_CONNECTIONS);
        assert_eq!(config.database.recovery_policy, RecoveryPolicy::Abort);
        assert!(config.journal_enabled);
        assert!(config.device_address.is_none());
    }

    #[test]
    fn test_config_load_from_file_fills_missing_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        std::fs::write(
            &config_path,
            r#"{
                "log_level": "debug",
                "database": { "recovery_policy": "reset" },
                "device_address": "00:11:22:33:44:55"
            }"#,
        )
        .unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.database.recovery_policy, RecoveryPolicy::Reset);
        assert_eq!(config.database.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
        assert_eq!(config.device_address.as_deref(), Some("00:11:22:33:44:55"));
        assert_eq!(config.instrument_model, DEFAULT_INSTRUMENT_MODEL);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.instrument_model = "TS30".to_string();
        config.database.reader_connections = 4;
        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        assert_eq!(loaded.instrument_model, "TS30");
        assert_eq!(loaded.database.reader_connections, 4);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.database, DatabaseSettings::default());
    }

    #[test]
    fn test_zero_readers_rejected() {
        let mut config = Config::default();
        config.database.reader_connections = 0;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_recovery_policy_parse() {
        assert_eq!("abort".parse::<RecoveryPolicy>().unwrap(), RecoveryPolicy::Abort);
        assert_eq!(" Reset ".parse::<RecoveryPolicy>().unwrap(), RecoveryPolicy::Reset);
        assert!("wipe".parse::<RecoveryPolicy>().is_err());
        assert_eq!(RecoveryPolicy::Reset.as_str(), "reset");
    }
}
