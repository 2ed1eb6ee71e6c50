//! Storage error taxonomy.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Storage error type.
///
/// Cloneable so a single failure can be fanned out to every observer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A field value is invalid. Caller-correctable, never retried.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// The referenced record or session does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient storage fault. Retried once before it surfaces.
    #[error("Storage I/O failure: {0}")]
    IoFailure(String),

    /// The store cannot be read or migrated. Fatal at startup.
    #[error("Corrupt state: {0}")]
    CorruptState(String),

    /// The observer went away before delivery.
    #[error("Cancelled before delivery")]
    Cancelled,

    /// The engine has been closed.
    #[error("Database is closed")]
    Closed,
}

impl StorageError {
    /// Whether the engine retries this error once before surfacing it.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::IoFailure(_))
    }

    /// Whether this error must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CorruptState(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _) => match err.code {
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                    Self::CorruptState(e.to_string())
                }
                ErrorCode::ConstraintViolation => Self::ConstraintViolation(e.to_string()),
                _ => Self::IoFailure(e.to_string()),
            },
            _ => Self::IoFailure(e.to_string()),
        }
    }
}

impl From<tokio_rusqlite::Error> for StorageError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        match e {
            tokio_rusqlite::Error::Rusqlite(e) => e.into(),
            tokio_rusqlite::Error::ConnectionClosed => Self::Closed,
            tokio_rusqlite::Error::Close((_, e)) => {
                Self::IoFailure(format!("failed to close connection: {}", e))
            }
            other => Self::IoFailure(other.to_string()),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::IoFailure(e.to_string())
    }
}

/// Result type alias using StorageError.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: std::os::raw::c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn corrupt_codes_map_to_corrupt_state() {
        let err: StorageError = sqlite_failure(rusqlite::ffi::SQLITE_NOTADB).into();
        assert!(err.is_fatal());

        let err: StorageError = sqlite_failure(rusqlite::ffi::SQLITE_CORRUPT).into();
        assert!(matches!(err, StorageError::CorruptState(_)));
    }

    #[test]
    fn constraint_code_maps_to_constraint_violation() {
        let err: StorageError = sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT_CHECK).into();
        assert!(matches!(err, StorageError::ConstraintViolation(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn io_and_busy_are_transient() {
        let err: StorageError = sqlite_failure(rusqlite::ffi::SQLITE_IOERR).into();
        assert!(err.is_transient());

        let err: StorageError = sqlite_failure(rusqlite::ffi::SQLITE_BUSY).into();
        assert!(err.is_transient());
    }

    #[test]
    fn closed_connection_maps_to_closed() {
        let err: StorageError = tokio_rusqlite::Error::ConnectionClosed.into();
        assert_eq!(err, StorageError::Closed);
    }
}
