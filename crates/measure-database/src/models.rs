//! Domain types for measurement records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{StorageError, StorageResult};

/// System-assigned record identity. Monotonically increasing, never reused.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl RecordId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Grouping key for records captured in one interaction session.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Creates a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a session ID from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unit of a measured distance. Closed set; the tag is what gets stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "m")]
    Meters,
    #[serde(rename = "mm")]
    Millimeters,
    #[serde(rename = "ft")]
    Feet,
    #[serde(rename = "ftUS")]
    UsSurveyFeet,
    #[serde(rename = "in")]
    Inches,
}

impl Unit {
    pub const ALL: [Unit; 5] = [
        Unit::Meters,
        Unit::Millimeters,
        Unit::Feet,
        Unit::UsSurveyFeet,
        Unit::Inches,
    ];

    /// Storage tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meters => "m",
            Self::Millimeters => "mm",
            Self::Feet => "ft",
            Self::UsSurveyFeet => "ftUS",
            Self::Inches => "in",
        }
    }

    /// Exact storage tag only. Use `parse` for user input.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|unit| unit.as_str() == tag)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = StorageError;

    /// Accepts the storage tag or a spelled-out name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m" | "meter" | "meters" | "metre" | "metres" => Ok(Self::Meters),
            "mm" | "millimeter" | "millimeters" | "millimetre" | "millimetres" => {
                Ok(Self::Millimeters)
            }
            "ft" | "foot" | "feet" => Ok(Self::Feet),
            "ftus" | "us_ft" | "us survey feet" | "us-survey-feet" => Ok(Self::UsSurveyFeet),
            "in" | "inch" | "inches" => Ok(Self::Inches),
            _ => Err(StorageError::ConstraintViolation(format!(
                "unrecognized unit: {:?}",
                s
            ))),
        }
    }
}

/// One persisted measurement reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub id: RecordId,
    pub value: f64,
    pub unit: Unit,
    pub captured_at: DateTime<Utc>,
    pub session_id: Option<SessionId>,
    pub note: Option<String>,
}

/// A measurement to be inserted. The id is assigned by storage.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMeasurement {
    pub value: f64,
    pub unit: Unit,
    pub captured_at: DateTime<Utc>,
    pub session_id: Option<SessionId>,
    pub note: Option<String>,
}

impl NewMeasurement {
    /// Creates a validated measurement.
    ///
    /// `captured_at` is truncated to whole milliseconds, the precision it is
    /// stored with.
    pub fn new(value: f64, unit: Unit, captured_at: DateTime<Utc>) -> StorageResult<Self> {
        let measurement = Self {
            value,
            unit,
            captured_at: truncate_to_millis(captured_at),
            session_id: None,
            note: None,
        };
        measurement.validate()?;
        Ok(measurement)
    }

    pub fn with_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Checks the field constraints. Called again at the data access boundary
    /// since the fields are public.
    pub fn validate(&self) -> StorageResult<()> {
        if !self.value.is_finite() {
            return Err(StorageError::ConstraintViolation(format!(
                "value must be finite, got {}",
                self.value
            )));
        }
        if self.value < 0.0 {
            return Err(StorageError::ConstraintViolation(format!(
                "value must be non-negative, got {}",
                self.value
            )));
        }
        if let Some(session) = &self.session_id {
            if session.as_str().trim().is_empty() {
                return Err(StorageError::ConstraintViolation(
                    "session id must not be blank".to_string(),
                ));
            }
        }
        Ok(())
    }
}

pub(crate) fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Position in the `captured_at DESC, id DESC` ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub captured_at_ms: i64,
    pub id: RecordId,
}

impl PageCursor {
    pub fn after(record: &MeasurementRecord) -> Self {
        Self {
            captured_at_ms: record.captured_at.timestamp_millis(),
            id: record.id,
        }
    }
}

/// Request for one page of records.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub session: Option<SessionId>,
    pub after: Option<PageCursor>,
    pub limit: usize,
}

impl PageRequest {
    /// First page over all records.
    pub fn first(limit: usize) -> Self {
        Self {
            session: None,
            after: None,
            limit,
        }
    }

    pub fn in_session(mut self, session: impl Into<SessionId>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// The request for the page following `page`, if there is one.
    pub fn next(&self, page: &Page) -> Option<Self> {
        page.next.map(|cursor| Self {
            session: self.session.clone(),
            after: Some(cursor),
            limit: self.limit,
        })
    }
}

/// One page of records plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<MeasurementRecord>,
    pub next: Option<PageCursor>,
}
