//! The measurement repository.
//!
//! Every mutation takes the write lock, commits to SQLite, rebuilds the
//! cached snapshot from committed rows, and publishes it, all before the lock
//! is released. Mutations run on their own task: a caller that stops waiting
//! loses only the result, never the write or its notification.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use measure_database::{
    MeasurementDao, MeasurementRecord, Page, PageRequest, RecordId, SessionId, StorageError,
    StorageResult,
};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::export::{self, ExportScope};
use crate::ingest::{RawReading, RecordError, RecordResult};
use crate::journal::RawReadingJournal;
use crate::live::{SnapshotHub, Subscription};
use crate::permission::{AlwaysGranted, PermissionGate};
use crate::snapshot::Snapshot;

/// Optional collaborators for [`Repository::open_with`].
pub struct RepositoryOptions {
    pub permission: Arc<dyn PermissionGate>,
    pub journal: Option<RawReadingJournal>,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            permission: Arc::new(AlwaysGranted),
            journal: None,
        }
    }
}

pub(crate) struct Inner {
    pub(crate) dao: MeasurementDao,
    pub(crate) hub: Arc<SnapshotHub>,
    permission: Arc<dyn PermissionGate>,
    journal: Option<RawReadingJournal>,
    /// Serializes mutations, subscription and shutdown.
    pub(crate) write_lock: Mutex<()>,
    current: RwLock<Snapshot>,
}

/// Single ingestion point and source of observable record views.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Repository {
    pub(crate) inner: Arc<Inner>,
}

impl Repository {
    /// Opens a repository with default options.
    pub async fn open(dao: MeasurementDao) -> StorageResult<Self> {
        Self::open_with(dao, RepositoryOptions::default()).await
    }

    /// Opens a repository, rebuilding the cached snapshot from storage.
    ///
    /// Recovery publishes nothing.
    pub async fn open_with(dao: MeasurementDao, options: RepositoryOptions) -> StorageResult<Self> {
        let inner = Arc::new(Inner {
            dao,
            hub: SnapshotHub::new(),
            permission: options.permission,
            journal: options.journal,
            write_lock: Mutex::new(()),
            current: RwLock::new(Snapshot::empty()),
        });

        info!("Starting recovery from SQLite");
        let records = inner.dao.query_all().await?;
        let count = records.len();
        *inner.current.write() = Snapshot::new(records, 0);
        info!(records = count, "Recovery complete");

        Ok(Self { inner })
    }

    /// Records one reading.
    ///
    /// Checks the permission gate, validates, journals, stores, then notifies
    /// every observer. A journal failure is logged and does not stop the store.
    pub async fn record(&self, reading: RawReading) -> RecordResult<RecordId> {
        if !self.inner.permission.state().is_granted() {
            warn!("Reading rejected: permission not granted");
            return Err(RecordError::PermissionDenied);
        }
        let measurement = reading.to_measurement()?;

        let id = self
            .mutate("record", move |inner| async move {
                if inner.dao.database().is_closed().await {
                    return Err(StorageError::Closed);
                }
                if let Some(journal) = &inner.journal {
                    journal_reading(journal, &reading).await;
                }
                let id = inner.dao.insert(measurement).await?;
                Ok((id, true))
            })
            .await?;

        debug!(id = %id, "Reading recorded");
        Ok(id)
    }

    /// Deletes one record.
    pub async fn remove(&self, id: RecordId) -> StorageResult<()> {
        self.mutate("remove", move |inner| async move {
            inner.dao.delete_by_id(id).await?;
            Ok(((), true))
        })
        .await
    }

    /// Sets or clears the note of one record.
    pub async fn annotate(&self, id: RecordId, note: Option<String>) -> StorageResult<()> {
        self.mutate("annotate", move |inner| async move {
            inner.dao.annotate(id, note).await?;
            Ok(((), true))
        })
        .await
    }

    /// Deletes every record of a session. Observers are notified only when
    /// something was deleted.
    pub async fn purge_session(&self, session: SessionId) -> StorageResult<u64> {
        self.mutate("purge_session", move |inner| async move {
            let deleted = inner.dao.delete_by_session(session).await?;
            Ok((deleted, deleted > 0))
        })
        .await
    }

    /// Subscribes to every record.
    pub async fn observe_all(&self) -> Subscription {
        self.observe(None).await
    }

    /// Subscribes to the records of one session.
    pub async fn observe_session(&self, session: SessionId) -> Subscription {
        self.observe(Some(session)).await
    }

    /// Subscribes with an optional session filter. The current snapshot is
    /// delivered first.
    pub async fn observe(&self, filter: Option<SessionId>) -> Subscription {
        // Held so no commit lands between reading `current` and registering.
        let _guard = self.inner.write_lock.lock().await;
        let current = self.inner.current.read().clone();
        self.inner.hub.subscribe(filter, &current)
    }

    /// The last committed snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.current.read().clone()
    }

    pub async fn all(&self) -> StorageResult<Vec<MeasurementRecord>> {
        self.inner.dao.query_all().await
    }

    pub async fn by_session(&self, session: SessionId) -> StorageResult<Vec<MeasurementRecord>> {
        self.inner.dao.query_by_session(session).await
    }

    pub async fn page(&self, request: PageRequest) -> StorageResult<Page> {
        self.inner.dao.query_page(request).await
    }

    pub async fn get(&self, id: RecordId) -> StorageResult<Option<MeasurementRecord>> {
        self.inner.dao.get(id).await
    }

    /// Writes records to a CSV file and returns how many were written.
    pub async fn export_csv(
        &self,
        path: impl Into<PathBuf>,
        scope: ExportScope,
    ) -> StorageResult<usize> {
        let records = match &scope {
            ExportScope::All => self.all().await?,
            ExportScope::Session(session) => self.by_session(session.clone()).await?,
        };
        let path = path.into();
        let count = records.len();

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_csv_file(&target, &records))
            .await
            .map_err(|e| StorageError::IoFailure(format!("export task failed: {}", e)))??;

        info!(path = %path.display(), records = count, "Exported measurements");
        Ok(count)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.hub.subscriber_count()
    }

    /// Ends every subscription and closes the store. Waits for the mutation in
    /// flight, if any. Later mutations fail with [`StorageError::Closed`].
    pub async fn shutdown(&self) -> StorageResult<()> {
        let _guard = self.inner.write_lock.lock().await;
        self.inner.hub.close();
        self.inner.dao.database().close().await?;
        info!("Repository shut down");
        Ok(())
    }

    async fn mutate<T, F, Fut>(&self, operation: &'static str, op: F) -> StorageResult<T>
    where
        F: FnOnce(Arc<Inner>) -> Fut + Send + 'static,
        Fut: Future<Output = StorageResult<(T, bool)>> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let _guard = inner.write_lock.lock().await;
            match op(inner.clone()).await {
                Ok((value, changed)) => {
                    if changed {
                        inner.refresh_and_publish().await;
                    }
                    Ok(value)
                }
                Err(e) => {
                    if e.is_transient() {
                        inner.hub.publish_error(&e);
                    }
                    debug!(operation, error = %e, "Mutation failed");
                    Err(e)
                }
            }
        });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(StorageError::Cancelled),
            Err(e) => Err(StorageError::IoFailure(format!(
                "{} task failed: {}",
                operation, e
            ))),
        }
    }
}

impl Inner {
    /// Rebuilds the snapshot from committed rows and publishes it. Caller
    /// holds the write lock.
    async fn refresh_and_publish(&self) {
        match self.dao.query_all().await {
            Ok(records) => {
                let snapshot = {
                    let mut current = self.current.write();
                    *current = Snapshot::new(records, current.revision() + 1);
                    current.clone()
                };
                debug!(
                    revision = snapshot.revision(),
                    records = snapshot.len(),
                    "Publishing snapshot"
                );
                self.hub.publish(&snapshot);
            }
            Err(e) => {
                warn!(error = %e, "Committed change could not be read back");
                self.hub.publish_error(&e);
            }
        }
    }
}

/// Journals one reading, retrying a transient failure once. A journal that
/// cannot be written is logged and never blocks the insert.
async fn journal_reading(journal: &RawReadingJournal, reading: &RawReading) {
    let result = match journal.append(reading).await {
        Err(first) if first.is_transient() => match journal.append(reading).await {
            Ok(()) => {
                warn!(error = %first, "Journal append recovered after retry");
                Ok(())
            }
            err => err,
        },
        other => other,
    };
    if let Err(e) = result {
        warn!(
            path = %journal.path().display(),
            error = %e,
            "Reading not journaled; storing it anyway"
        );
    }
}

fn write_csv_file(path: &Path, records: &[MeasurementRecord]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    export::write_csv(records, std::io::BufWriter::new(file))?;
    Ok(())
}
