//! # Measure engine
//!
//! The single ingestion point for measurement readings, and the source of
//! every observable view of them.
//!
//! ## Principles
//!
//! - **SQLite is the only durable store** - a reading is committed before anyone hears of it
//! - **Snapshots are derived** - rebuilt from committed rows, never edited in place
//! - **Notifications reflect committed reality** - published after commit, in commit order
//! - **Recovery emits nothing** - opening rebuilds the cached snapshot silently
//!
//! ## Architecture
//!
//! ```text
//! WRITE:
//!   record/remove/annotate/purge ─► write lock ─► SQLite ─► snapshot ─► hub
//!
//! READ:
//!   snapshot (cached) | all/by_session/page (SQLite readers) | subscriptions
//! ```
//!
//! ## Crate Structure
//!
//! - [`repository`] - The repository
//! - [`live`] - Snapshot hub and subscriptions
//! - [`snapshot`] - Immutable snapshot views
//! - [`ingest`] - Ingestion payload and errors
//! - [`permission`] - Permission gate for ingestion
//! - [`journal`] - Append-only raw reading journal
//! - [`export`] - CSV export
//! - [`bootstrap`] - Startup wiring from configuration

pub mod bootstrap;
pub mod export;
pub mod ingest;
pub mod journal;
pub mod live;
pub mod permission;
pub mod repository;
pub mod snapshot;

#[cfg(test)]
mod tests;

pub use export::ExportScope;
pub use ingest::{RawReading, RecordError, RecordResult};
pub use journal::RawReadingJournal;
pub use live::{SnapshotHub, Subscription};
pub use permission::{AlwaysGranted, PermissionGate, PermissionState, SharedPermission};
pub use repository::{Repository, RepositoryOptions};
pub use snapshot::{Emission, Snapshot};

pub use measure_database::{
    MeasurementRecord, Page, PageRequest, RecordId, SessionId, StorageError, StorageResult, Unit,
};
