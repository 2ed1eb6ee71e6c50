//! Append-only journal of accepted raw readings.
//!
//! One JSON object per line, written before the reading is handed to the
//! store. If a reading is lost between the instrument and the store, the
//! journal still has it.

use std::path::{Path, PathBuf};

use measure_database::{StorageError, StorageResult};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::RawReading;

#[derive(Debug, Clone)]
pub struct RawReadingJournal {
    path: PathBuf,
}

impl RawReadingJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one reading and flushes it to disk.
    pub async fn append(&self, reading: &RawReading) -> StorageResult<()> {
        let mut line = serde_json::to_string(reading)
            .map_err(|e| StorageError::IoFailure(format!("failed to encode reading: {}", e)))?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Reads every journaled reading in append order.
    ///
    /// Lines that do not parse (such as a line cut short by a crash) are
    /// skipped with a warning.
    pub async fn read_all(&self) -> StorageResult<Vec<RawReading>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut readings = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(reading) => readings.push(reading),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable journal line"
                ),
            }
        }
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_journal_reads_empty() {
        let dir = tempdir().unwrap();
        let journal = RawReadingJournal::new(dir.path().join("none.jsonl"));
        assert!(journal.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn appends_one_line_per_reading() {
        let dir = tempdir().unwrap();
        let journal = RawReadingJournal::new(dir.path().join("data/raw.jsonl"));

        let first = RawReading::new(12.5, "m", Utc::now());
        let second = RawReading::new(3.0, "ft", Utc::now()).with_note("wall");
        journal.append(&first).await.unwrap();
        journal.append(&second).await.unwrap();

        let content = std::fs::read_to_string(journal.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert_eq!(journal.read_all().await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn truncated_line_is_skipped() {
        let dir = tempdir().unwrap();
        let journal = RawReadingJournal::new(dir.path().join("raw.jsonl"));
        let reading = RawReading::new(1.0, "mm", Utc::now());
        journal.append(&reading).await.unwrap();

        let mut content = std::fs::read_to_string(journal.path()).unwrap();
        content.push_str("{\"value\": 2.0, \"un");
        std::fs::write(journal.path(), content).unwrap();

        assert_eq!(journal.read_all().await.unwrap(), vec![reading]);
    }
}
