//! Startup wiring: configuration in, a ready repository out.
//!
//! Call [`measure_config_and_utils::init_logging`] first if log output is
//! wanted; this module only emits events.

use std::sync::Arc;

use anyhow::{Context, Result};
use measure_config_and_utils::{Config, Paths};
use measure_database::{DatabaseConfig, MeasurementDao, MeasurementDatabase};
use tracing::info;

use crate::journal::RawReadingJournal;
use crate::permission::{AlwaysGranted, PermissionGate};
use crate::repository::{Repository, RepositoryOptions};

/// Opens the store described by `config` and builds the repository, with
/// ingestion always permitted.
pub async fn start(config: &Config, paths: &Paths) -> Result<Repository> {
    start_with_permission(config, paths, Arc::new(AlwaysGranted)).await
}

/// Like [`start`], with an explicit permission gate.
///
/// The store is opened (and migrated) here, so a corrupt store fails startup
/// instead of the first read.
pub async fn start_with_permission(
    config: &Config,
    paths: &Paths,
    permission: Arc<dyn PermissionGate>,
) -> Result<Repository> {
    config.validate().context("invalid configuration")?;
    paths
        .ensure_dirs()
        .context("failed to create data directories")?;

    info!(
        instrument = %config.instrument_model,
        device = ?config.device_address,
        recovery_policy = config.database.recovery_policy.as_str(),
        "Starting measurement core"
    );

    let db_config = DatabaseConfig::from_settings(&config.database, paths);
    let db = Arc::new(MeasurementDatabase::new(db_config));
    db.ensure_open()
        .await
        .context("measurement store could not be opened")?;

    let journal = config
        .journal_enabled
        .then(|| RawReadingJournal::new(paths.journal_file()));

    let repository = Repository::open_with(
        MeasurementDao::new(db),
        RepositoryOptions {
            permission,
            journal,
        },
    )
    .await
    .context("failed to load measurements")?;

    info!(records = repository.snapshot().len(), "Measurement core ready");
    Ok(repository)
}
