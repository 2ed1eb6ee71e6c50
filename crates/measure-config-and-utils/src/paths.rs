//! File system paths for the measurement core.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Manages file system paths.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for all local state (~/.measure)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.measure`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".measure"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.measure).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.measure/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the data directory (~/.measure/data).
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("data")
    }

    /// Get the database file path for the given file name.
    pub fn database_file(&self, file_name: &str) -> PathBuf {
        self.data_dir().join(file_name)
    }

    /// Get the raw-reading journal path (~/.measure/data/raw_readings.jsonl).
    pub fn journal_file(&self) -> PathBuf {
        self.data_dir().join("raw_readings.jsonl")
    }

    /// Get the export directory (~/.measure/exports).
    pub fn exports_dir(&self) -> PathBuf {
        self.base_dir.join("exports")
    }

    /// Get the logs directory (~/.measure/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the structured log file path (~/.measure/logs/measure.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("measure.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.exports_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
