//! Error types for the sync engine.

use jobmirror_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the sync engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Store I/O failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The configuration cannot be used.
    #[error("configuration error: {0}")]
    Config(String),

    /// The coordinator is no longer receiving notifications.
    #[error("engine coordinator has stopped")]
    ChannelClosed,

    /// The coordinator task panicked or was cancelled.
    #[error("engine coordinator task failed: {0}")]
    TaskFailed(String),
}

impl EngineError {
    /// Returns true if the operation can succeed on a later commit cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}
