//! Error types for store operations.

use jobmirror_model::{Fingerprint, ModelError};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store cannot be reached right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer within its timeout.
    #[error("store operation timed out")]
    Timeout,

    /// A constraint rejected the write (duplicate fingerprint, missing parent).
    #[error("integrity violation: {message}")]
    Integrity {
        /// The job whose row caused the violation, when known.
        fingerprint: Option<Fingerprint>,
        /// Store-provided description.
        message: String,
    },

    /// A change-set named a column that is not a mutable column.
    #[error("column {column:?} is not a mutable column of {table}")]
    InvalidColumn {
        /// Table the update targeted.
        table: &'static str,
        /// Rejected column name.
        column: String,
    },

    /// A table prefix or other identifier is not a plain SQL identifier.
    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),

    /// A stored value could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] ModelError),

    /// Any other SQLite error.
    #[error("sqlite error: {0}")]
    Sql(rusqlite::Error),

    /// I/O error while preparing the store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Creates an integrity error for a known job.
    pub fn integrity(fingerprint: Fingerprint, message: impl Into<String>) -> Self {
        Self::Integrity {
            fingerprint: Some(fingerprint),
            message: message.into(),
        }
    }

    /// Returns true if the operation may succeed when retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout)
    }

    /// Returns true if retrying the same write would repeat the failure.
    pub fn is_integrity(&self) -> bool {
        matches!(self, StoreError::Integrity { .. })
    }

    /// Returns true for errors caused by a programming or setup defect.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidColumn { .. } | StoreError::InvalidIdentifier(_)
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(failure, _) => failure.code,
            _ => return StoreError::Sql(err),
        };
        match code {
            ErrorCode::ConstraintViolation => StoreError::Integrity {
                fingerprint: None,
                message: err.to_string(),
            },
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StoreError::Timeout,
            ErrorCode::CannotOpen | ErrorCode::SystemIoFailure | ErrorCode::NotADatabase => {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Sql(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), Some("boom".into()))
    }

    #[test]
    fn classifies_sqlite_failures() {
        let busy = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_BUSY));
        assert!(busy.is_transient());

        let constraint = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT));
        assert!(constraint.is_integrity());
        assert!(!constraint.is_transient());

        let other = StoreError::from(rusqlite::Error::InvalidQuery);
        assert!(matches!(other, StoreError::Sql(_)));
    }

    #[test]
    fn configuration_errors() {
        assert!(StoreError::InvalidIdentifier("a b".into()).is_configuration());
        let err = StoreError::InvalidColumn {
            table: "jobs",
            column: "hash".into(),
        };
        assert!(err.is_configuration());
        assert!(err.to_string().contains("hash"));
    }
}
