//! Persistence engine: owns the store handles and serializes access to them.
//!
//! Every handle is a `tokio_rusqlite::Connection`, which runs its queries on
//! a dedicated background thread. The engine holds one writer and a small set
//! of readers:
//!
//! - Writes go to the writer's FIFO queue and hold the gate exclusively.
//! - Reads are spread round-robin over the readers and share the gate.
//! - `close()` takes the gate exclusively, so it waits for in-flight work.
//!
//! Handles are opened lazily on first use, exactly once. Only SQL and row
//! mapping should run inside the closures passed to [`MeasurementDatabase::read`]
//! and [`MeasurementDatabase::write`]; anything else starves the store thread.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use measure_config_and_utils::{DatabaseSettings, Paths, RecoveryPolicy};
use tokio::sync::{OnceCell, RwLock};
use tokio_rusqlite::Connection;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{migrations, StorageError, StorageResult};

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// A database file, created on first open.
    File(PathBuf),
    /// A private in-memory store shared by this engine's connections.
    Memory { name: String },
}

impl StoreLocation {
    fn open_target(&self) -> String {
        match self {
            Self::File(path) => path.to_string_lossy().to_string(),
            Self::Memory { name } => format!("file:{}?mode=memory&cache=shared", name),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory { .. })
    }
}

impl std::fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory { name } => write!(f, "memory:{}", name),
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub location: StoreLocation,
    pub reader_connections: usize,
    pub busy_timeout: Duration,
    pub recovery_policy: RecoveryPolicy,
}

impl DatabaseConfig {
    /// A file-backed store with default settings.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::with_location(StoreLocation::File(path.into()))
    }

    /// A fresh in-memory store. Each call yields an independent store.
    pub fn in_memory() -> Self {
        Self::with_location(StoreLocation::Memory {
            name: format!("measure-{}", Uuid::new_v4()),
        })
    }

    /// Settings from the loaded configuration.
    pub fn from_settings(settings: &DatabaseSettings, paths: &Paths) -> Self {
        Self::file(paths.database_file(&settings.file_name))
            .with_readers(settings.reader_connections)
            .with_busy_timeout(Duration::from_millis(settings.busy_timeout_ms))
            .with_recovery_policy(settings.recovery_policy)
    }

    fn with_location(location: StoreLocation) -> Self {
        let defaults = DatabaseSettings::default();
        Self {
            location,
            reader_connections: defaults.reader_connections,
            busy_timeout: Duration::from_millis(defaults.busy_timeout_ms),
            recovery_policy: defaults.recovery_policy,
        }
    }

    /// Number of reader connections. At least one is always opened.
    pub fn with_readers(mut self, readers: usize) -> Self {
        self.reader_connections = readers.max(1);
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_recovery_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.recovery_policy = policy;
        self
    }
}

struct Handles {
    writer: Connection,
    readers: Vec<Connection>,
    next_reader: AtomicUsize,
}

impl Handles {
    fn reader(&self) -> &Connection {
        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        &self.readers[index]
    }
}

/// The persistence engine.
///
/// Share it behind an `Arc`; all methods take `&self`.
pub struct MeasurementDatabase {
    config: DatabaseConfig,
    handles: OnceCell<Handles>,
    /// Holds `true` once the engine has been closed.
    gate: RwLock<bool>,
}

impl MeasurementDatabase {
    /// Create an engine. Nothing is opened until the first operation or
    /// [`ensure_open`](Self::ensure_open).
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            handles: OnceCell::new(),
            gate: RwLock::new(false),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Open the store now, running migrations, so a corrupt or unmigratable
    /// store is reported before anything depends on it.
    pub async fn ensure_open(&self) -> StorageResult<()> {
        let closed = self.gate.read().await;
        if *closed {
            return Err(StorageError::Closed);
        }
        self.handles().await?;
        Ok(())
    }

    /// Run a read-only closure on one of the reader connections.
    ///
    /// The closure may run twice if the first attempt fails with
    /// [`StorageError::IoFailure`].
    pub async fn read<F, T>(&self, operation: &'static str, f: F) -> StorageResult<T>
    where
        F: Fn(&rusqlite::Connection) -> StorageResult<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let f = Arc::new(f);
        let closed = self.gate.read().await;
        if *closed {
            return Err(StorageError::Closed);
        }
        let handles = self.handles().await?;
        retry_once(operation, || call(handles.reader(), f.clone())).await
    }

    /// Run a closure on the writer connection while holding the gate
    /// exclusively.
    ///
    /// The closure may run twice if the first attempt fails with
    /// [`StorageError::IoFailure`]; SQLite rolls back a failed statement, so
    /// the retry never doubles a write.
    pub async fn write<F, T>(&self, operation: &'static str, f: F) -> StorageResult<T>
    where
        F: Fn(&rusqlite::Connection) -> StorageResult<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let f = Arc::new(f);
        let closed = self.gate.write().await;
        if *closed {
            return Err(StorageError::Closed);
        }
        let handles = self.handles().await?;
        retry_once(operation, || call(&handles.writer, f.clone())).await
    }

    /// Highest applied schema version.
    pub async fn schema_version(&self) -> StorageResult<i32> {
        self.read("schema_version", |conn| migrations::schema_version(conn))
            .await
    }

    pub async fn is_closed(&self) -> bool {
        *self.gate.read().await
    }

    /// Release every handle. Waits for in-flight operations; later calls
    /// fail with [`StorageError::Closed`]. Closing again is a no-op.
    pub async fn close(&self) -> StorageResult<()> {
        let mut closed = self.gate.write().await;
        if *closed {
            debug!(location = %self.config.location, "Database already closed");
            return Ok(());
        }
        *closed = true;

        if let Some(handles) = self.handles.get() {
            let mut result = Ok(());
            for reader in &handles.readers {
                if let Err(e) = reader.clone().close().await {
                    result = Err(StorageError::from(e));
                }
            }
            if let Err(e) = handles.writer.clone().close().await {
                result = Err(StorageError::from(e));
            }
            if let Err(e) = &result {
                warn!(location = %self.config.location, error = %e, "Error while closing database");
            }
            result?;
        }

        info!(location = %self.config.location, "Database closed");
        Ok(())
    }

    async fn handles(&self) -> StorageResult<&Handles> {
        self.handles.get_or_try_init(|| self.open_handles()).await
    }

    async fn open_handles(&self) -> StorageResult<Handles> {
        match self.try_open().await {
            Err(StorageError::CorruptState(reason))
                if self.config.recovery_policy == RecoveryPolicy::Reset =>
            {
                warn!(
                    location = %self.config.location,
                    reason = %reason,
                    "Store is unreadable, resetting"
                );
                if let StoreLocation::File(path) = &self.config.location {
                    quarantine(path).await?;
                }
                self.try_open().await
            }
            Err(e) => {
                error!(location = %self.config.location, error = %e, "Failed to open database");
                Err(e)
            }
            ok => ok,
        }
    }

    async fn try_open(&self) -> StorageResult<Handles> {
        let location = &self.config.location;
        if let StoreLocation::File(path) = location {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        info!(location = %location, "Opening measurement database");
        let target = location.open_target();
        let writer = Connection::open(target.clone()).await?;

        let busy_timeout = self.config.busy_timeout;
        let wal = !location.is_memory();
        let prepared = writer
            .call(move |conn| {
                if let Err(e) = prepare_writer(conn, busy_timeout, wal) {
                    return Ok(Err(e));
                }
                Ok(migrations::run_migrations(conn))
            })
            .await
            .map_err(StorageError::from)
            .and_then(|inner| inner);

        if let Err(e) = prepared {
            if let Err(close_err) = writer.close().await {
                debug!(error = %close_err, "Failed to close writer after open error");
            }
            return Err(e);
        }

        let mut readers = Vec::with_capacity(self.config.reader_connections);
        for _ in 0..self.config.reader_connections.max(1) {
            let reader = Connection::open(target.clone()).await?;
            reader
                .call(move |conn| {
                    conn.busy_timeout(busy_timeout)?;
                    conn.execute_batch("PRAGMA query_only = ON;")?;
                    Ok(())
                })
                .await?;
            readers.push(reader);
        }

        info!(
            location = %location,
            readers = readers.len(),
            "Measurement database initialized"
        );

        Ok(Handles {
            writer,
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }
}

fn prepare_writer(
    conn: &rusqlite::Connection,
    busy_timeout: Duration,
    wal: bool,
) -> StorageResult<()> {
    conn.busy_timeout(busy_timeout)?;
    if wal {
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!(journal_mode = %mode, "Journal mode set");
    }
    conn.execute_batch(
        "
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA temp_store = MEMORY;
        ",
    )?;
    Ok(())
}

/// Move an unreadable store (and its WAL side files) out of the way.
async fn quarantine(path: &Path) -> StorageResult<()> {
    let suffix = format!("corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%3f"));
    for companion in ["", "-wal", "-shm"] {
        let mut from = path.as_os_str().to_owned();
        from.push(companion);
        let from = PathBuf::from(from);
        if !tokio::fs::try_exists(&from).await? {
            continue;
        }
        let mut to = from.as_os_str().to_owned();
        to.push(".");
        to.push(&suffix);
        let to = PathBuf::from(to);
        tokio::fs::rename(&from, &to).await?;
        warn!(from = %from.display(), to = %to.display(), "Moved unreadable store aside");
    }
    Ok(())
}

async fn call<F, T>(conn: &Connection, f: Arc<F>) -> StorageResult<T>
where
    F: Fn(&rusqlite::Connection) -> StorageResult<T> + Send + Sync + 'static,
    T: Send + 'static,
{
    conn.call(move |conn| Ok((*f)(&*conn)))
        .await
        .map_err(StorageError::from)?
}

/// Run `op`, and run it once more if it fails with a transient error.
///
/// A recovered failure is logged once at warn level; a failure that survives
/// the retry is logged at error level and returned.
pub(crate) async fn retry_once<T, Fut, Op>(operation: &'static str, mut op: Op) -> StorageResult<T>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    match op().await {
        Err(first) if first.is_transient() => match op().await {
            Ok(value) => {
                warn!(operation, error = %first, "Storage operation recovered after retry");
                Ok(value)
            }
            Err(e) => {
                error!(operation, error = %e, "Storage operation failed after retry");
                Err(e)
            }
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{queries, NewMeasurement, Unit};
    use std::sync::atomic::AtomicU32;
    use tempfile::tempdir;

    fn reading(value: f64) -> NewMeasurement {
        NewMeasurement::new(value, Unit::Meters, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn opens_lazily_and_migrates() {
        let db = MeasurementDatabase::new(DatabaseConfig::in_memory());
        assert!(db.handles.get().is_none());

        db.ensure_open().await.unwrap();
        assert_eq!(
            db.schema_version().await.unwrap(),
            migrations::CURRENT_VERSION
        );
    }

    #[tokio::test]
    async fn readers_see_committed_writes() {
        let db = MeasurementDatabase::new(DatabaseConfig::in_memory().with_readers(3));
        let new = reading(1.25);
        db.write("insert", move |conn| queries::insert(conn, &new))
            .await
            .unwrap();

        for _ in 0..3 {
            let count = db.read("count", queries::count).await.unwrap();
            assert_eq!(count, 1);
        }
    }

    #[tokio::test]
    async fn in_memory_stores_are_independent() {
        let a = MeasurementDatabase::new(DatabaseConfig::in_memory());
        let b = MeasurementDatabase::new(DatabaseConfig::in_memory());
        let new = reading(2.0);
        a.write("insert", move |conn| queries::insert(conn, &new))
            .await
            .unwrap();

        assert_eq!(a.read("count", queries::count).await.unwrap(), 1);
        assert_eq!(b.read("count", queries::count).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn readers_are_query_only() {
        let db = MeasurementDatabase::new(DatabaseConfig::in_memory());
        let result = db
            .read("bad_write", |conn| {
                conn.execute("DELETE FROM measurements", [])?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/measurements.sqlite");

        let db = MeasurementDatabase::new(DatabaseConfig::file(&path));
        let new = reading(7.5);
        db.write("insert", move |conn| queries::insert(conn, &new))
            .await
            .unwrap();
        db.close().await.unwrap();

        let db = MeasurementDatabase::new(DatabaseConfig::file(&path));
        assert_eq!(db.read("count", queries::count).await.unwrap(), 1);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_is_single_shot() {
        let db = MeasurementDatabase::new(DatabaseConfig::in_memory());
        db.ensure_open().await.unwrap();

        db.close().await.unwrap();
        db.close().await.unwrap();
        assert!(db.is_closed().await);

        assert_eq!(
            db.read("count", queries::count).await,
            Err(StorageError::Closed)
        );
        let new = reading(1.0);
        assert_eq!(
            db.write("insert", move |conn| queries::insert(conn, &new))
                .await,
            Err(StorageError::Closed)
        );
        assert_eq!(db.ensure_open().await, Err(StorageError::Closed));
    }

    #[tokio::test]
    async fn close_before_open_never_opens() {
        let db = MeasurementDatabase::new(DatabaseConfig::in_memory());
        db.close().await.unwrap();
        assert!(db.handles.get().is_none());
        assert_eq!(db.ensure_open().await, Err(StorageError::Closed));
    }

    #[tokio::test]
    async fn close_waits_for_in_flight_write() {
        let db = Arc::new(MeasurementDatabase::new(DatabaseConfig::in_memory()));
        db.ensure_open().await.unwrap();

        let writer = {
            let db = db.clone();
            tokio::spawn(async move {
                db.write("slow_insert", |conn| {
                    std::thread::sleep(Duration::from_millis(100));
                    queries::insert(conn, &reading(3.0))
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        db.close().await.unwrap();
        assert!(writer.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn garbage_file_is_corrupt_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.sqlite");
        std::fs::write(&path, vec![0xA5u8; 4096]).unwrap();

        let db = MeasurementDatabase::new(DatabaseConfig::file(&path));
        assert!(matches!(
            db.ensure_open().await,
            Err(StorageError::CorruptState(_))
        ));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn future_schema_is_corrupt_unless_reset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("future.sqlite");
        {
            let mut conn = rusqlite::Connection::open(&path).unwrap();
            migrations::run_migrations(&mut conn).unwrap();
            conn.execute(
                "INSERT INTO migrations (version, name) VALUES (?1, 'newer')",
                [migrations::CURRENT_VERSION + 1],
            )
            .unwrap();
        }

        let db = MeasurementDatabase::new(DatabaseConfig::file(&path));
        assert!(matches!(
            db.ensure_open().await,
            Err(StorageError::CorruptState(_))
        ));

        let db = MeasurementDatabase::new(
            DatabaseConfig::file(&path).with_recovery_policy(RecoveryPolicy::Reset),
        );
        db.ensure_open().await.unwrap();
        assert_eq!(db.read("count", queries::count).await.unwrap(), 0);
        assert_eq!(
            db.schema_version().await.unwrap(),
            migrations::CURRENT_VERSION
        );

        let quarantined = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .any(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(quarantined);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn retry_once_recovers_transient_failure() {
        let attempts = AtomicU32::new(0);
        let result = retry_once("flaky", || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(StorageError::IoFailure("disk busy".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(1));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_once_gives_up_after_second_failure() {
        let attempts = AtomicU32::new(0);
        let result: StorageResult<()> = retry_once("broken", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::IoFailure("disk gone".into())) }
        })
        .await;

        assert!(matches!(result, Err(StorageError::IoFailure(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_once_never_retries_constraint_errors() {
        let attempts = AtomicU32::new(0);
        let result: StorageResult<()> = retry_once("invalid", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::ConstraintViolation("negative".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
