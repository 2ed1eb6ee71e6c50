//! Ingestion payload and errors.

use chrono::{DateTime, Utc};
use measure_database::{NewMeasurement, SessionId, StorageError, StorageResult, Unit};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A reading as delivered by the instrument link, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub value: f64,
    /// Unit tag or name as reported by the instrument (e.g. "m", "feet").
    pub unit: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl RawReading {
    pub fn new(value: f64, unit: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            value,
            unit: unit.into(),
            captured_at,
            session_id: None,
            note: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Validates the reading into an insertable measurement.
    pub fn to_measurement(&self) -> StorageResult<NewMeasurement> {
        let unit: Unit = self.unit.parse()?;
        let mut measurement = NewMeasurement::new(self.value, unit, self.captured_at)?;
        measurement.session_id = self.session_id.clone();
        measurement.note = self.note.clone();
        measurement.validate()?;
        Ok(measurement)
    }
}

/// Why a reading was not recorded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Ingestion is not permitted right now. Recoverable once granted.
    #[error("Permission to record measurements has not been granted")]
    PermissionDenied,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RecordError {
    /// Whether the caller can retry after fixing the cause.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::PermissionDenied => true,
            Self::Storage(e) => !e.is_fatal() && *e != StorageError::Closed,
        }
    }
}

/// Result type alias using RecordError.
pub type RecordResult<T> = Result<T, RecordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_reading_validates_unit_and_value() {
        let now = Utc::now();
        let ok = RawReading::new(3.0, "ft", now)
            .with_session("s")
            .to_measurement()
            .unwrap();
        assert_eq!(ok.unit, Unit::Feet);
        assert_eq!(ok.session_id, Some(SessionId::from("s")));

        assert!(matches!(
            RawReading::new(3.0, "parsec", now).to_measurement(),
            Err(StorageError::ConstraintViolation(_))
        ));
        assert!(matches!(
            RawReading::new(-3.0, "m", now).to_measurement(),
            Err(StorageError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn raw_reading_json_omits_empty_fields() {
        let reading = RawReading::new(1.5, "m", Utc::now());
        let json = serde_json::to_string(&reading).unwrap();
        assert!(!json.contains("session_id"));
        assert!(!json.contains("note"));

        let back: RawReading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reading);
    }

    #[test]
    fn permission_denied_is_recoverable() {
        assert!(RecordError::PermissionDenied.is_recoverable());
        assert!(!RecordError::Storage(StorageError::CorruptState("x".into())).is_recoverable());
        assert!(!RecordError::Storage(StorageError::Closed).is_recoverable());
    }
}
