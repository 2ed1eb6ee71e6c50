//! CSV export of measurement records.
//!
//! Columns are `id,value,unit,captured_at,session_id,note`. Fields are quoted
//! per RFC 4180 when they contain a comma, quote, or line break.

use std::borrow::Cow;
use std::io::{self, Write};

use chrono::SecondsFormat;
use measure_database::{MeasurementRecord, SessionId};

pub const CSV_HEADER: &str = "id,value,unit,captured_at,session_id,note";

/// Which records an export covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportScope {
    All,
    Session(SessionId),
}

/// Writes `records` as CSV, header first, lines ending in CRLF.
pub fn write_csv<W: Write>(records: &[MeasurementRecord], mut writer: W) -> io::Result<()> {
    write!(writer, "{}\r\n", CSV_HEADER)?;
    for record in records {
        let session = record.session_id.as_ref().map(|s| s.as_str()).unwrap_or("");
        let note = record.note.as_deref().unwrap_or("");
        write!(
            writer,
            "{},{},{},{},{},{}\r\n",
            record.id,
            record.value,
            record.unit.as_str(),
            record
                .captured_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            escape(session),
            escape(note),
        )?;
    }
    writer.flush()
}

fn escape(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}
