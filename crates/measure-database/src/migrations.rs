//! Database migrations.
//!
//! Migrations are run in order, each inside its own transaction, and tracked
//! in the `migrations` table. A store whose recorded history cannot be
//! reconciled with this list is reported as [`StorageError::CorruptState`].

use rusqlite::{Connection, OptionalExtension, Transaction};
use tracing::{debug, info};

use crate::{StorageError, StorageResult};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 3;

/// One schema step, moving the store from `version - 1` to `version`.
pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub apply: fn(&Transaction<'_>) -> rusqlite::Result<()>,
}

/// All migrations, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "measurements_table",
        apply: migrate_v1_measurements_table,
    },
    Migration {
        version: 2,
        name: "measurement_note",
        apply: migrate_v2_measurement_note,
    },
    Migration {
        version: 3,
        name: "measurement_indexes",
        apply: migrate_v3_measurement_indexes,
    },
];

/// Run all pending migrations.
pub fn run_migrations(conn: &mut Connection) -> StorageResult<()> {
    migrate_to(conn, CURRENT_VERSION)
}

/// Run pending migrations up to and including `target`.
pub fn migrate_to(conn: &mut Connection, target: i32) -> StorageResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version = verify_history(conn)?;

    info!(current_version, target_version = target, "Running migrations");

    for migration in MIGRATIONS
        .iter()
        .filter(|m| m.version > current_version && m.version <= target)
    {
        info!(version = migration.version, name = migration.name, "Applying migration");
        let tx = conn.transaction()?;
        (migration.apply)(&tx)?;
        tx.execute(
            "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.name],
        )?;
        tx.commit()?;
        debug!(version = migration.version, "Migration applied");
    }

    info!("Migrations complete");
    Ok(())
}

/// Highest applied version, or 0 for a fresh store.
pub fn schema_version(conn: &Connection) -> StorageResult<i32> {
    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM migrations", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Checks that the recorded versions are exactly `1..=n` with `n` known to
/// this build, and returns `n`.
fn verify_history(conn: &Connection) -> StorageResult<i32> {
    let mut stmt = conn.prepare("SELECT version FROM migrations ORDER BY version")?;
    let versions = stmt
        .query_map([], |row| row.get::<_, i32>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(&latest) = versions.last() {
        if latest > CURRENT_VERSION {
            return Err(StorageError::CorruptState(format!(
                "store schema version {} is newer than supported version {}",
                latest, CURRENT_VERSION
            )));
        }
    }

    for (expected, &found) in (1..).zip(versions.iter()) {
        if found != expected {
            return Err(StorageError::CorruptState(format!(
                "migration history has a gap: expected version {}, found {}",
                expected, found
            )));
        }
    }

    if versions.is_empty() && table_exists(conn, "measurements")? {
        return Err(StorageError::CorruptState(
            "measurements table exists without migration history".to_string(),
        ));
    }

    Ok(versions.len() as i32)
}

fn table_exists(conn: &Connection, name: &str) -> StorageResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// V1: measurements table.
fn migrate_v1_measurements_table(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "
        CREATE TABLE measurements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            value REAL NOT NULL CHECK (value >= 0),
            unit TEXT NOT NULL,
            captured_at INTEGER NOT NULL,
            session_id TEXT
        );
        ",
    )
}

/// V2: free-text note on each record.
fn migrate_v2_measurement_note(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch("ALTER TABLE measurements ADD COLUMN note TEXT;")
}

/// V3: indexes for the default ordering and the session filter.
fn migrate_v3_measurement_indexes(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_measurements_captured_at
            ON measurements(captured_at DESC, id DESC);
        CREATE INDEX IF NOT EXISTS idx_measurements_session_id
            ON measurements(session_id);
        ",
    )
}
