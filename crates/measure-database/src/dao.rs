//! Async data access facade over [`MeasurementDatabase`].

use std::sync::Arc;

use crate::{
    queries, MeasurementDatabase, MeasurementRecord, NewMeasurement, Page, PageRequest, RecordId,
    SessionId, StorageError, StorageResult,
};

/// Typed CRUD and query operations on measurement records.
///
/// Input is validated here, before any work is sent to a store thread.
#[derive(Clone)]
pub struct MeasurementDao {
    db: Arc<MeasurementDatabase>,
}

impl MeasurementDao {
    pub fn new(db: Arc<MeasurementDatabase>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<MeasurementDatabase> {
        &self.db
    }

    /// Insert a measurement and return its assigned id.
    pub async fn insert(&self, new: NewMeasurement) -> StorageResult<RecordId> {
        new.validate()?;
        self.db
            .write("insert", move |conn| queries::insert(conn, &new))
            .await
    }

    pub async fn get(&self, id: RecordId) -> StorageResult<Option<MeasurementRecord>> {
        self.db.read("get", move |conn| queries::get(conn, id)).await
    }

    /// Every record, ordered `captured_at DESC, id DESC`.
    pub async fn query_all(&self) -> StorageResult<Vec<MeasurementRecord>> {
        self.db.read("query_all", queries::query_all).await
    }

    pub async fn query_by_session(
        &self,
        session: SessionId,
    ) -> StorageResult<Vec<MeasurementRecord>> {
        self.db
            .read("query_by_session", move |conn| {
                queries::query_by_session(conn, &session)
            })
            .await
    }

    /// One page of the default ordering. Follow [`PageRequest::next`] for more.
    pub async fn query_page(&self, request: PageRequest) -> StorageResult<Page> {
        if request.limit == 0 {
            return Err(StorageError::ConstraintViolation(
                "page limit must be at least 1".to_string(),
            ));
        }
        self.db
            .read("query_page", move |conn| queries::query_page(conn, &request))
            .await
    }

    /// Set or clear the note of a record.
    pub async fn annotate(&self, id: RecordId, note: Option<String>) -> StorageResult<()> {
        self.db
            .write("annotate", move |conn| {
                queries::annotate(conn, id, note.as_deref())
            })
            .await
    }

    pub async fn delete_by_id(&self, id: RecordId) -> StorageResult<()> {
        self.db
            .write("delete_by_id", move |conn| queries::delete_by_id(conn, id))
            .await
    }

    /// Delete a whole session. Returns the number of records removed.
    pub async fn delete_by_session(&self, session: SessionId) -> StorageResult<u64> {
        if session.as_str().trim().is_empty() {
            return Err(StorageError::ConstraintViolation(
                "session id must not be blank".to_string(),
            ));
        }
        self.db
            .write("delete_by_session", move |conn| {
                queries::delete_by_session(conn, &session)
            })
            .await
    }

    pub async fn count(&self) -> StorageResult<u64> {
        self.db.read("count", queries::count).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DatabaseConfig, Unit};
    use chrono::{DateTime, Utc};

    fn dao() -> MeasurementDao {
        MeasurementDao::new(Arc::new(MeasurementDatabase::new(
            DatabaseConfig::in_memory(),
        )))
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[tokio::test]
    async fn insert_and_query_round_trip() {
        let dao = dao();
        let new = NewMeasurement::new(12.5, Unit::Meters, at(5_000))
            .unwrap()
            .with_session("s1");
        let id = dao.insert(new.clone()).await.unwrap();

        let all = dao.query_all().await.unwrap();
        assert_eq!(all.len(), 1);
        let record = &all[0];
        assert_eq!(record.id, id);
        assert_eq!(record.value, new.value);
        assert_eq!(record.unit, new.unit);
        assert_eq!(record.captured_at, new.captured_at);
        assert_eq!(record.session_id, new.session_id);
        assert_eq!(dao.get(id).await.unwrap().as_ref(), Some(record));
    }

    #[tokio::test]
    async fn invalid_insert_never_reaches_storage() {
        let dao = dao();
        let mut new = NewMeasurement::new(1.0, Unit::Feet, at(0)).unwrap();
        new.value = f64::NEG_INFINITY;

        assert!(matches!(
            dao.insert(new).await,
            Err(StorageError::ConstraintViolation(_))
        ));
        assert_eq!(dao.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn blank_session_purge_rejected() {
        let dao = dao();
        assert!(dao.delete_by_session(SessionId::from(" ")).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_inserts_get_distinct_ids() {
        let dao = dao();
        let mut handles = Vec::new();
        for i in 0..20 {
            let dao = dao.clone();
            handles.push(tokio::spawn(async move {
                let new = NewMeasurement::new(i as f64, Unit::Millimeters, at(i)).unwrap();
                dao.insert(new).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
        assert_eq!(dao.count().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn paging_through_dao() {
        let dao = dao();
        for i in 0..3 {
            dao.insert(NewMeasurement::new(1.0, Unit::Inches, at(i)).unwrap())
                .await
                .unwrap();
        }

        let first = dao.query_page(PageRequest::first(2)).await.unwrap();
        assert_eq!(first.records.len(), 2);
        let request = PageRequest::first(2).next(&first).unwrap();
        let second = dao.query_page(request).await.unwrap();
        assert_eq!(second.records.len(), 1);
        assert!(second.next.is_none());
    }

    #[tokio::test]
    async fn huge_page_limit_leaves_readers_usable() {
        let dao = dao();
        for i in 0..3 {
            dao.insert(NewMeasurement::new(1.0, Unit::Meters, at(i)).unwrap())
                .await
                .unwrap();
        }

        for limit in [usize::MAX, i64::MAX as usize] {
            let page = dao.query_page(PageRequest::first(limit)).await.unwrap();
            assert_eq!(page.records.len(), 3);
            assert!(page.next.is_none());
        }
        // Every reader connection still answers.
        for _ in 0..8 {
            assert_eq!(dao.count().await.unwrap(), 3);
        }
    }

    #[tokio::test]
    async fn annotate_and_delete_missing_are_not_found() {
        let dao = dao();
        assert!(matches!(
            dao.annotate(RecordId(42), Some("x".into())).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            dao.delete_by_id(RecordId(42)).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
