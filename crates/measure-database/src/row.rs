//! Storage row for the `measurements` table and its conversions.

use chrono::DateTime;

use crate::{MeasurementRecord, NewMeasurement, RecordId, SessionId, StorageError, Unit};

/// A `measurements` row exactly as SQLite stores it.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRow {
    pub id: i64,
    pub value: f64,
    pub unit: String,
    pub captured_at_ms: i64,
    pub session_id: Option<String>,
    pub note: Option<String>,
}

impl MeasurementRow {
    /// Column list matching [`MeasurementRow::from_sql`].
    pub const COLUMNS: &'static str = "id, value, unit, captured_at, session_id, note";

    /// Reads a row selected with [`MeasurementRow::COLUMNS`].
    pub fn from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            value: row.get(1)?,
            unit: row.get(2)?,
            captured_at_ms: row.get(3)?,
            session_id: row.get(4)?,
            note: row.get(5)?,
        })
    }

    /// Row for a record that has not been assigned an id yet (`id` is 0).
    pub fn from_new(new: &NewMeasurement) -> Self {
        Self {
            id: 0,
            value: new.value,
            unit: new.unit.as_str().to_string(),
            captured_at_ms: new.captured_at.timestamp_millis(),
            session_id: new.session_id.as_ref().map(|s| s.as_str().to_string()),
            note: new.note.clone(),
        }
    }
}

impl From<&MeasurementRecord> for MeasurementRow {
    fn from(record: &MeasurementRecord) -> Self {
        Self {
            id: record.id.as_i64(),
            value: record.value,
            unit: record.unit.as_str().to_string(),
            captured_at_ms: record.captured_at.timestamp_millis(),
            session_id: record.session_id.as_ref().map(|s| s.as_str().to_string()),
            note: record.note.clone(),
        }
    }
}

impl TryFrom<MeasurementRow> for MeasurementRecord {
    type Error = StorageError;

    /// A row that could never have been written through the data access
    /// layer means the file was altered underneath us.
    fn try_from(row: MeasurementRow) -> Result<Self, Self::Error> {
        let unit = Unit::from_tag(&row.unit).ok_or_else(|| {
            StorageError::CorruptState(format!(
                "record {} has unknown unit tag {:?}",
                row.id, row.unit
            ))
        })?;

        if !row.value.is_finite() || row.value < 0.0 {
            return Err(StorageError::CorruptState(format!(
                "record {} has invalid value {}",
                row.id, row.value
            )));
        }

        let captured_at = DateTime::from_timestamp_millis(row.captured_at_ms).ok_or_else(|| {
            StorageError::CorruptState(format!(
                "record {} has out-of-range timestamp {}",
                row.id, row.captured_at_ms
            ))
        })?;

        Ok(Self {
            id: RecordId(row.id),
            value: row.value,
            unit,
            captured_at,
            session_id: row.session_id.map(SessionId::from),
            note: row.note,
        })
    }
}
