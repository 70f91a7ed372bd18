//! The relational store interface used by the sync engine.

use crate::error::StoreResult;
use jobmirror_model::{ChangeSet, FileIndex, FileRecord, Fingerprint, JobId, JobRecord};
use std::collections::HashMap;

/// Changed columns of one file, addressed by its index inside the parent.
pub type FileChange = (FileIndex, ChangeSet);

/// A transactional relational store holding job and file rows.
///
/// Every method is one round trip and either applies completely or not at
/// all. Implementations bound each call by their own timeout; callers do not
/// retry within a call.
pub trait JobStore: Send + Sync {
    /// Lightweight liveness check.
    fn ping(&self) -> bool;

    /// Looks up surrogate keys of already stored jobs.
    ///
    /// Fingerprints without a row are absent from the result.
    fn exists_by_fingerprint(
        &self,
        fingerprints: &[Fingerprint],
    ) -> StoreResult<HashMap<Fingerprint, JobId>>;

    /// Inserts job rows and returns the keys the store assigned.
    ///
    /// Fails with an integrity error naming the offending fingerprint if one
    /// of them is already stored; nothing is inserted in that case.
    fn insert_batch(&self, jobs: &[JobRecord]) -> StoreResult<HashMap<Fingerprint, JobId>>;

    /// Updates exactly the columns named in `changes` on one job row.
    fn update_fields(&self, id: JobId, changes: &ChangeSet) -> StoreResult<()>;

    /// Inserts file rows under a committed job.
    fn insert_files(&self, parent: JobId, files: &[FileRecord]) -> StoreResult<()>;

    /// Updates changed columns of several files of one job.
    fn update_file_fields(&self, parent: JobId, changes: &[FileChange]) -> StoreResult<()>;

    /// Deletes a job and its files. Returns whether a row existed.
    fn delete_by_fingerprint(&self, fingerprint: &Fingerprint) -> StoreResult<bool>;

    /// Replaces transient statuses with their stable equivalent and zeroes
    /// live counters on every row. Returns the number of rows it changed.
    fn correct_transient_statuses(&self) -> StoreResult<u64>;

    /// Reads the persisted values of the given jobs.
    fn fetch_job_snapshots(&self, ids: &[JobId]) -> StoreResult<HashMap<JobId, JobRecord>>;

    /// Reads the persisted values of a job's files.
    fn fetch_file_snapshots(&self, parent: JobId) -> StoreResult<HashMap<FileIndex, FileRecord>>;
}

impl<S: JobStore + ?Sized> JobStore for &S {
    fn ping(&self) -> bool {
        (**self).ping()
    }

    fn exists_by_fingerprint(
        &self,
        fingerprints: &[Fingerprint],
    ) -> StoreResult<HashMap<Fingerprint, JobId>> {
        (**self).exists_by_fingerprint(fingerprints)
    }

    fn insert_batch(&self, jobs: &[JobRecord]) -> StoreResult<HashMap<Fingerprint, JobId>> {
        (**self).insert_batch(jobs)
    }

    fn update_fields(&self, id: JobId, changes: &ChangeSet) -> StoreResult<()> {
        (**self).update_fields(id, changes)
    }

    fn insert_files(&self, parent: JobId, files: &[FileRecord]) -> StoreResult<()> {
        (**self).insert_files(parent, files)
    }

    fn update_file_fields(&self, parent: JobId, changes: &[FileChange]) -> StoreResult<()> {
        (**self).update_file_fields(parent, changes)
    }

    fn delete_by_fingerprint(&self, fingerprint: &Fingerprint) -> StoreResult<bool> {
        (**self).delete_by_fingerprint(fingerprint)
    }

    fn correct_transient_statuses(&self) -> StoreResult<u64> {
        (**self).correct_transient_statuses()
    }

    fn fetch_job_snapshots(&self, ids: &[JobId]) -> StoreResult<HashMap<JobId, JobRecord>> {
        (**self).fetch_job_snapshots(ids)
    }

    fn fetch_file_snapshots(&self, parent: JobId) -> StoreResult<HashMap<FileIndex, FileRecord>> {
        (**self).fetch_file_snapshots(parent)
    }
}

impl<S: JobStore + ?Sized> JobStore for std::sync::Arc<S> {
    fn ping(&self) -> bool {
        (**self).ping()
    }

    fn exists_by_fingerprint(
        &self,
        fingerprints: &[Fingerprint],
    ) -> StoreResult<HashMap<Fingerprint, JobId>> {
        (**self).exists_by_fingerprint(fingerprints)
    }

    fn insert_batch(&self, jobs: &[JobRecord]) -> StoreResult<HashMap<Fingerprint, JobId>> {
        (**self).insert_batch(jobs)
    }

    fn update_fields(&self, id: JobId, changes: &ChangeSet) -> StoreResult<()> {
        (**self).update_fields(id, changes)
    }

    fn insert_files(&self, parent: JobId, files: &[FileRecord]) -> StoreResult<()> {
        (**self).insert_files(parent, files)
    }

    fn update_file_fields(&self, parent: JobId, changes: &[FileChange]) -> StoreResult<()> {
        (**self).update_file_fields(parent, changes)
    }

    fn delete_by_fingerprint(&self, fingerprint: &Fingerprint) -> StoreResult<bool> {
        (**self).delete_by_fingerprint(fingerprint)
    }

    fn correct_transient_statuses(&self) -> StoreResult<u64> {
        (**self).correct_transient_statuses()
    }

    fn fetch_job_snapshots(&self, ids: &[JobId]) -> StoreResult<HashMap<JobId, JobRecord>> {
        (**self).fetch_job_snapshots(ids)
    }

    fn fetch_file_snapshots(&self, parent: JobId) -> StoreResult<HashMap<FileIndex, FileRecord>> {
        (**self).fetch_file_snapshots(parent)
    }
}
