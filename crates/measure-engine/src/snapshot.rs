//! Snapshot views of committed measurement records.
//!
//! # Design Principles
//!
//! - Snapshots are derived from SQLite, on open and after every commit
//! - Snapshots are immutable after creation
//! - Every published snapshot carries a higher revision than the last

use std::sync::Arc;

use measure_database::{MeasurementRecord, RecordId, SessionId, StorageError};

/// One item delivered to a subscription.
pub type Emission = Result<Snapshot, StorageError>;

/// An immutable, ordered view of records at one revision.
///
/// Records are in `captured_at DESC, id DESC` order. Cloning is cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    records: Arc<[MeasurementRecord]>,
    revision: u64,
}

impl Snapshot {
    /// Creates an empty snapshot at revision 0.
    pub fn empty() -> Self {
        Self::new(Vec::new(), 0)
    }

    pub fn new(records: Vec<MeasurementRecord>, revision: u64) -> Self {
        Self {
            records: records.into(),
            revision,
        }
    }

    pub fn records(&self) -> &Arc<[MeasurementRecord]> {
        &self.records
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MeasurementRecord> + '_ {
        self.records.iter()
    }

    pub fn get(&self, id: RecordId) -> Option<&MeasurementRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// The records of one session, at the same revision.
    pub fn for_session(&self, session: &SessionId) -> Snapshot {
        let records: Vec<MeasurementRecord> = self
            .records
            .iter()
            .filter(|r| r.session_id.as_ref() == Some(session))
            .cloned()
            .collect();
        Self::new(records, self.revision)
    }

    /// Applies an optional session filter.
    pub fn filtered(&self, filter: Option<&SessionId>) -> Snapshot {
        match filter {
            Some(session) => self.for_session(session),
            None => self.clone(),
        }
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use measure_database::Unit;

    fn record(id: i64, session: Option<&str>) -> MeasurementRecord {
        MeasurementRecord {
            id: RecordId(id),
            value: id as f64,
            unit: Unit::Meters,
            captured_at: Utc::now(),
            session_id: session.map(SessionId::from),
            note: None,
        }
    }

    #[test]
    fn empty_snapshot() {
        let snapshot = Snapshot::empty();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.revision(), 0);
    }

    #[test]
    fn for_session_keeps_revision_and_order() {
        let snapshot = Snapshot::new(
            vec![record(3, Some("a")), record(2, None), record(1, Some("a"))],
            5,
        );
        let filtered = snapshot.for_session(&SessionId::from("a"));
        assert_eq!(filtered.revision(), 5);
        let ids: Vec<_> = filtered.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![RecordId(3), RecordId(1)]);

        assert_eq!(snapshot.filtered(None).len(), 3);
    }

    #[test]
    fn clones_share_records() {
        let snapshot = Snapshot::new(vec![record(1, None)], 1);
        let copy = snapshot.clone();
        assert!(Arc::ptr_eq(snapshot.records(), copy.records()));
        assert!(copy.get(RecordId(1)).is_some());
        assert!(copy.get(RecordId(2)).is_none());
    }
}
