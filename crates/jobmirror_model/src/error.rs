//! Error types for the model crate.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while decoding model values from their stored form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Fingerprint text was not 40 hex characters.
    #[error("invalid fingerprint {input:?}: {reason}")]
    InvalidFingerprint {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Stored status integer has no matching variant.
    #[error("unknown job status value {0}")]
    UnknownStatus(i64),
}
