//! Read access to externally owned jobs.

use crate::ids::Fingerprint;
use crate::record::{FileRecord, JobRecord};

/// A job owned by the upstream engine.
///
/// jobmirror only reads through this trait. Implementations hand out the
/// values current at the time of the call; the engine keeps the job behind
/// an `Arc` and never copies or mutates the underlying object.
pub trait JobSource: Send + Sync {
    /// The job's immutable fingerprint.
    fn fingerprint(&self) -> Fingerprint;

    /// Current values of the job row.
    fn record(&self) -> JobRecord;

    /// Current values of the job's files.
    fn files(&self) -> Vec<FileRecord>;
}
