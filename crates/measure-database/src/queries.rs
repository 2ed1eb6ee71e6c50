//! Standalone query functions over a `rusqlite::Connection`.
//!
//! Each function is one statement, so a concurrent reader never observes a
//! partially written record. All listings use the `captured_at DESC, id DESC`
//! ordering; `id` breaks ties between readings captured in the same
//! millisecond.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::{
    MeasurementRecord, MeasurementRow, NewMeasurement, Page, PageCursor, PageRequest, RecordId,
    SessionId, StorageError, StorageResult,
};

const ORDER_BY: &str = "ORDER BY captured_at DESC, id DESC";

/// Insert a validated measurement and return its assigned id.
pub fn insert(conn: &Connection, new: &NewMeasurement) -> StorageResult<RecordId> {
    new.validate()?;
    let row = MeasurementRow::from_new(new);
    let mut stmt = conn.prepare_cached(
        "INSERT INTO measurements (value, unit, captured_at, session_id, note)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    stmt.execute(params![
        row.value,
        row.unit,
        row.captured_at_ms,
        row.session_id,
        row.note,
    ])?;
    let id = RecordId(conn.last_insert_rowid());
    debug!(id = %id, "Inserted measurement");
    Ok(id)
}

/// Get a record by id.
pub fn get(conn: &Connection, id: RecordId) -> StorageResult<Option<MeasurementRecord>> {
    let sql = format!(
        "SELECT {} FROM measurements WHERE id = ?1",
        MeasurementRow::COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let row = stmt
        .query_row(params![id.as_i64()], MeasurementRow::from_sql)
        .optional()?;
    row.map(MeasurementRecord::try_from).transpose()
}

/// Every record, newest first.
pub fn query_all(conn: &Connection) -> StorageResult<Vec<MeasurementRecord>> {
    let sql = format!(
        "SELECT {} FROM measurements {}",
        MeasurementRow::COLUMNS,
        ORDER_BY
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map([], MeasurementRow::from_sql)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(MeasurementRecord::try_from).collect()
}

/// Records of one session, newest first.
pub fn query_by_session(
    conn: &Connection,
    session: &SessionId,
) -> StorageResult<Vec<MeasurementRecord>> {
    let sql = format!(
        "SELECT {} FROM measurements WHERE session_id = ?1 {}",
        MeasurementRow::COLUMNS,
        ORDER_BY
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params![session.as_str()], MeasurementRow::from_sql)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(MeasurementRecord::try_from).collect()
}

/// One page of records after the request's cursor.
///
/// Keyset pagination: the cursor is the `(captured_at, id)` of the last
/// record already seen, so inserts between calls never shift later pages.
pub fn query_page(conn: &Connection, request: &PageRequest) -> StorageResult<Page> {
    if request.limit == 0 {
        return Err(StorageError::ConstraintViolation(
            "page limit must be at least 1".to_string(),
        ));
    }

    // Fetch one extra row to learn whether another page exists. Limits past
    // what SQLite can express mean "everything".
    let fetch = i64::try_from(request.limit)
        .unwrap_or(i64::MAX)
        .saturating_add(1);
    let (cursor_ts, cursor_id) = match request.after {
        Some(cursor) => (Some(cursor.captured_at_ms), Some(cursor.id.as_i64())),
        None => (None, None),
    };
    let session = request.session.as_ref().map(|s| s.as_str().to_string());

    let sql = format!(
        "SELECT {} FROM measurements
         WHERE (?1 IS NULL OR session_id = ?1)
           AND (?2 IS NULL OR captured_at < ?2 OR (captured_at = ?2 AND id < ?3))
         {}
         LIMIT ?4",
        MeasurementRow::COLUMNS,
        ORDER_BY
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(
            params![session, cursor_ts, cursor_id, fetch],
            MeasurementRow::from_sql,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = rows
        .into_iter()
        .map(MeasurementRecord::try_from)
        .collect::<StorageResult<Vec<_>>>()?;

    let next = if records.len() > request.limit {
        records.truncate(request.limit);
        records.last().map(PageCursor::after)
    } else {
        None
    };

    Ok(Page { records, next })
}

/// Replace the note of one record. No other field changes.
pub fn annotate(conn: &Connection, id: RecordId, note: Option<&str>) -> StorageResult<()> {
    let updated = conn.execute(
        "UPDATE measurements SET note = ?2 WHERE id = ?1",
        params![id.as_i64(), note],
    )?;
    if updated == 0 {
        return Err(StorageError::NotFound(format!("measurement {}", id)));
    }
    debug!(id = %id, "Annotated measurement");
    Ok(())
}

/// Delete one record.
pub fn delete_by_id(conn: &Connection, id: RecordId) -> StorageResult<()> {
    let deleted = conn.execute(
        "DELETE FROM measurements WHERE id = ?1",
        params![id.as_i64()],
    )?;
    if deleted == 0 {
        return Err(StorageError::NotFound(format!("measurement {}", id)));
    }
    debug!(id = %id, "Deleted measurement");
    Ok(())
}

/// Delete every record of a session and return how many went away.
pub fn delete_by_session(conn: &Connection, session: &SessionId) -> StorageResult<u64> {
    let deleted = conn.execute(
        "DELETE FROM measurements WHERE session_id = ?1",
        params![session.as_str()],
    )?;
    debug!(session_id = %session, deleted, "Purged session");
    Ok(deleted as u64)
}

/// Number of stored records.
pub fn count(conn: &Connection) -> StorageResult<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM measurements", [], |row| row.get(0))?;
    Ok(count as u64)
}
