//! Configuration, file system paths, and logging bootstrap for the measurement core.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DatabaseSettings, RecoveryPolicy, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_INSTRUMENT_MODEL,
    DEFAULT_LOG_LEVEL, DEFAULT_READER_CONNECTIONS,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
