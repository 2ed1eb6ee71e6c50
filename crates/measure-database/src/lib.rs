//! SQLite persistence layer for measurement records.
//!
//! This crate provides:
//! - The schema model: [`MeasurementRecord`], its storage row, and ordered migrations
//! - Standalone query functions over a `rusqlite::Connection` ([`queries`])
//! - The persistence engine ([`MeasurementDatabase`]): one writer thread, a set of
//!   reader threads, and a single-writer/multiple-reader gate
//! - The async data access facade ([`MeasurementDao`])
//!
//! # Architecture
//!
//! ```text
//! MeasurementDao ──► MeasurementDatabase::write ──► writer thread (FIFO)
//!                └─► MeasurementDatabase::read  ──► reader threads (round-robin)
//! ```
//!
//! Writes hold the gate exclusively, reads share it. Only SQL and row mapping
//! run inside the closures handed to the engine.

mod dao;
mod engine;
mod error;
pub mod migrations;
mod models;
pub mod queries;
mod row;

pub use dao::MeasurementDao;
pub use engine::{DatabaseConfig, MeasurementDatabase, StoreLocation};
pub use error::{StorageError, StorageResult};
pub use measure_config_and_utils::RecoveryPolicy;
pub use models::{
    MeasurementRecord, NewMeasurement, Page, PageCursor, PageRequest, RecordId, SessionId, Unit,
};
pub use row::MeasurementRow;
