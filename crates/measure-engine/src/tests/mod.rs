//! Scenario tests for the measurement repository.
//!
//! - `durability.rs`  - committed readings survive reopen; journal and export
//! - `live.rs`        - subscriptions: initial snapshot, freshness, teardown
//! - `ordering.rs`    - record ordering and revision monotonicity
//! - `concurrency.rs` - concurrent writers and abandoned callers
//! - `failures.rs`    - rejected input, permission, closed engine


use std::sync::Arc;

use chrono::{DateTime, Utc};
use measure_database::{DatabaseConfig, MeasurementDao, MeasurementDatabase};

use crate::{RawReading, Repository, SessionId, Unit};

pub(crate) async fn in_memory_repository() -> Repository {
    let db = Arc::new(MeasurementDatabase::new(DatabaseConfig::in_memory()));
    Repository::open(MeasurementDao::new(db)).await.unwrap()
}

pub(crate) fn at(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

/// A field session: two readings, one observer, one deletion.
#[tokio::test]
async fn field_session_workflow() {
    let repo = in_memory_repository().await;
    let mut sub = repo.observe_all().await;
    assert!(sub.recv().await.unwrap().unwrap().is_empty());

    let session = SessionId::new();
    let t1 = at(1_700_000_000_000);
    let t2 = at(1_700_000_060_000);

    let first = repo
        .record(RawReading::new(12.5, "m", t1).with_session(session.clone()))
        .await
        .unwrap();
    let one = sub.recv().await.unwrap().unwrap();
    assert_eq!(one.len(), 1);

    let second = repo
        .record(RawReading::new(3.0, "ft", t2).with_session(session.clone()))
        .await
        .unwrap();
    let two = sub.recv().await.unwrap().unwrap();
    let listed: Vec<_> = two.iter().map(|r| (r.id, r.value, r.unit)).collect();
    assert_eq!(
        listed,
        vec![(second, 3.0, Unit::Feet), (first, 12.5, Unit::Meters)]
    );

    repo.remove(first).await.unwrap();
    let three = sub.recv().await.unwrap().unwrap();
    assert_eq!(three.len(), 1);
    assert_eq!(three.records()[0].id, second);
    assert!(three.revision() > two.revision());

    let stored = repo.by_session(session).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].captured_at, t2);
}
