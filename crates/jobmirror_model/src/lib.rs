//! # jobmirror model
//!
//! Records shared by the jobmirror store and engine.
//!
//! This crate provides:
//! - Identity types (`Fingerprint`, `JobId`, `FileIndex`)
//! - The `JobStatus` enumeration with its stable store encoding
//! - Typed snapshot records for jobs and files
//! - Static field lists and sparse change-sets
//! - The `JobSource` trait through which upstream entities are observed
//!
//! ## Snapshots and field lists
//!
//! Every persisted entity kind has a snapshot struct implementing
//! [`Snapshot`]. Its `FIELDS` table names the mutable columns in a fixed
//! order together with an accessor, so diffing and update statements are
//! driven by the same list:
//!
//! ```rust
//! use jobmirror_model::{ChangeSet, Fingerprint, JobRecord, JobStatus, Snapshot};
//!
//! let mut record = JobRecord::new(Fingerprint::from_bytes([1; 20]), "ubuntu.iso");
//! record.status = JobStatus::Downloading;
//!
//! let status = JobRecord::field("status").unwrap();
//! let changes = ChangeSet::new().with("status", (status.get)(&record));
//! assert_eq!(changes.columns().collect::<Vec<_>>(), vec!["status"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod field;
mod ids;
mod record;
mod source;
mod status;

pub use error::{ModelError, ModelResult};
pub use field::{ChangeSet, Field, FieldValue, Snapshot};
pub use ids::{FileIndex, Fingerprint, JobId, FINGERPRINT_LEN};
pub use record::{FileRecord, JobRecord, COUNTER_COLUMNS, PROGRESS_COMPLETE};
pub use source::JobSource;
pub use status::JobStatus;
