//! Worker-level error types.

use thiserror::Error;

use crate::config::ConfigError;
use crate::storage::StorageError;

/// Errors that end a worker loop or abort scheduler setup.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Durable state could not be read or written.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Scheduler error.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}
