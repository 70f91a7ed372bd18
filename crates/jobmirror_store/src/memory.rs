//! In-memory store for testing.

use crate::error::{StoreError, StoreResult};
use crate::store::{FileChange, JobStore};
use jobmirror_model::{
    ChangeSet, FileIndex, FileRecord, Fingerprint, JobId, JobRecord, Snapshot,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

/// A statement the memory store executed.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Existence lookup.
    Exists {
        /// Fingerprints looked up.
        fingerprints: Vec<Fingerprint>,
    },
    /// Job batch insert.
    InsertJobs {
        /// Fingerprints inserted.
        fingerprints: Vec<Fingerprint>,
    },
    /// Single-row job update.
    UpdateJob {
        /// Updated row.
        id: JobId,
        /// Columns written.
        columns: Vec<&'static str>,
    },
    /// File batch insert.
    InsertFiles {
        /// Parent row.
        parent: JobId,
        /// Number of files inserted.
        count: usize,
    },
    /// Batched file update under one parent.
    UpdateFiles {
        /// Parent row.
        parent: JobId,
        /// Files written.
        indexes: Vec<FileIndex>,
    },
    /// Cascading delete.
    Delete {
        /// Deleted job.
        fingerprint: Fingerprint,
    },
    /// Exit-time correction.
    CorrectTransient,
    /// Job snapshot read.
    FetchJobs {
        /// Rows read.
        ids: Vec<JobId>,
    },
    /// File snapshot read.
    FetchFiles {
        /// Parent row.
        parent: JobId,
    },
}

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    jobs: BTreeMap<JobId, JobRecord>,
    by_fingerprint: HashMap<Fingerprint, JobId>,
    files: BTreeMap<JobId, BTreeMap<FileIndex, FileRecord>>,
}

/// An in-memory [`JobStore`].
///
/// Besides holding rows, the store can be switched offline to simulate an
/// unreachable database, can reject inserts of chosen fingerprints, and
/// records every statement it executed so tests can count round trips.
///
/// # Example
///
/// ```rust
/// use jobmirror_model::{Fingerprint, JobRecord};
/// use jobmirror_store::{JobStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// let fp = Fingerprint::from_bytes([1; 20]);
/// let ids = store.insert_batch(&[JobRecord::new(fp, "a")]).unwrap();
/// assert_eq!(store.exists_by_fingerprint(&[fp]).unwrap(), ids);
///
/// store.set_available(false);
/// assert!(!store.ping());
/// assert!(store.exists_by_fingerprint(&[fp]).is_err());
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    available: AtomicBool,
    rejected: Mutex<HashSet<Fingerprint>>,
    statements: Mutex<Vec<Statement>>,
}

impl MemoryStore {
    /// Creates an empty, reachable store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                next_id: 1,
                ..Tables::default()
            }),
            available: AtomicBool::new(true),
            rejected: Mutex::new(HashSet::new()),
            statements: Mutex::new(Vec::new()),
        }
    }

    /// Switches the store on or offline.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes every insert of `fingerprint` fail with an integrity error.
    pub fn reject_inserts_of(&self, fingerprint: Fingerprint) {
        self.rejected.lock().insert(fingerprint);
    }

    /// Stores a row directly, as a previous process would have.
    pub fn seed(&self, record: JobRecord) -> JobId {
        let mut tables = self.tables.write();
        Self::insert_row(&mut tables, record)
    }

    /// Returns the stored row of a job.
    pub fn job(&self, fingerprint: &Fingerprint) -> Option<(JobId, JobRecord)> {
        let tables = self.tables.read();
        let id = *tables.by_fingerprint.get(fingerprint)?;
        tables.jobs.get(&id).map(|record| (id, record.clone()))
    }

    /// Returns all stored job rows ordered by key.
    pub fn jobs(&self) -> Vec<(JobId, JobRecord)> {
        let tables = self.tables.read();
        tables
            .jobs
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect()
    }

    /// Returns the stored files of a job ordered by index.
    pub fn files(&self, parent: JobId) -> Vec<FileRecord> {
        let tables = self.tables.read();
        tables
            .files
            .get(&parent)
            .map(|files| files.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of stored file rows.
    pub fn file_count(&self) -> usize {
        self.tables.read().files.values().map(BTreeMap::len).sum()
    }

    /// Returns every statement executed so far.
    pub fn statements(&self) -> Vec<Statement> {
        self.statements.lock().clone()
    }

    /// Returns the executed job and file update statements.
    pub fn update_statements(&self) -> Vec<Statement> {
        self.statements
            .lock()
            .iter()
            .filter(|s| matches!(s, Statement::UpdateJob { .. } | Statement::UpdateFiles { .. }))
            .cloned()
            .collect()
    }

    /// Forgets recorded statements.
    pub fn clear_statements(&self) {
        self.statements.lock().clear();
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".into()))
        }
    }

    fn record(&self, statement: Statement) {
        self.statements.lock().push(statement);
    }

    fn insert_row(tables: &mut Tables, record: JobRecord) -> JobId {
        let id = JobId(tables.next_id);
        tables.next_id += 1;
        tables.by_fingerprint.insert(record.fingerprint, id);
        tables.jobs.insert(id, record);
        id
    }

    fn validate_columns<S: Snapshot>(table: &'static str, changes: &ChangeSet) -> StoreResult<()> {
        match changes.columns().find(|column| !S::is_mutable_column(column)) {
            Some(column) => Err(StoreError::InvalidColumn {
                table,
                column: column.to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore for MemoryStore {
    fn ping(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn exists_by_fingerprint(
        &self,
        fingerprints: &[Fingerprint],
    ) -> StoreResult<HashMap<Fingerprint, JobId>> {
        self.check_available()?;
        self.record(Statement::Exists {
            fingerprints: fingerprints.to_vec(),
        });
        let tables = self.tables.read();
        Ok(fingerprints
            .iter()
            .filter_map(|fp| tables.by_fingerprint.get(fp).map(|id| (*fp, *id)))
            .collect())
    }

    fn insert_batch(&self, jobs: &[JobRecord]) -> StoreResult<HashMap<Fingerprint, JobId>> {
        self.check_available()?;
        let mut tables = self.tables.write();
        let rejected = self.rejected.lock();
        let mut seen = HashSet::new();
        for job in jobs {
            let fp = job.fingerprint;
            if tables.by_fingerprint.contains_key(&fp) || !seen.insert(fp) {
                return Err(StoreError::integrity(fp, format!("duplicate fingerprint {fp}")));
            }
            if rejected.contains(&fp) {
                return Err(StoreError::integrity(fp, format!("insert of {fp} rejected")));
            }
        }
        self.record(Statement::InsertJobs {
            fingerprints: jobs.iter().map(|job| job.fingerprint).collect(),
        });
        Ok(jobs
            .iter()
            .map(|job| (job.fingerprint, Self::insert_row(&mut tables, job.clone())))
            .collect())
    }

    fn update_fields(&self, id: JobId, changes: &ChangeSet) -> StoreResult<()> {
        self.check_available()?;
        Self::validate_columns::<JobRecord>("jobs", changes)?;
        self.record(Statement::UpdateJob {
            id,
            columns: changes.columns().collect(),
        });
        let mut tables = self.tables.write();
        if let Some(record) = tables.jobs.get_mut(&id) {
            changes
                .apply_to(record)
                .map_err(|column| StoreError::InvalidColumn {
                    table: "jobs",
                    column: column.to_string(),
                })?;
        }
        Ok(())
    }

    fn insert_files(&self, parent: JobId, files: &[FileRecord]) -> StoreResult<()> {
        self.check_available()?;
        let mut tables = self.tables.write();
        let Some(fingerprint) = tables.jobs.get(&parent).map(|job| job.fingerprint) else {
            return Err(StoreError::Integrity {
                fingerprint: None,
                message: format!("parent job {parent} does not exist"),
            });
        };
        let existing = tables.files.entry(parent).or_default();
        if let Some(file) = files.iter().find(|f| existing.contains_key(&f.index)) {
            return Err(StoreError::integrity(
                fingerprint,
                format!("file {} of {parent} already stored", file.index),
            ));
        }
        for file in files {
            existing.insert(file.index, file.clone());
        }
        self.record(Statement::InsertFiles {
            parent,
            count: files.len(),
        });
        Ok(())
    }

    fn update_file_fields(&self, parent: JobId, changes: &[FileChange]) -> StoreResult<()> {
        self.check_available()?;
        for (_, change) in changes {
            Self::validate_columns::<FileRecord>("job_files", change)?;
        }
        self.record(Statement::UpdateFiles {
            parent,
            indexes: changes.iter().map(|(index, _)| *index).collect(),
        });
        let mut tables = self.tables.write();
        if let Some(files) = tables.files.get_mut(&parent) {
            for (index, change) in changes {
                if let Some(file) = files.get_mut(index) {
                    change
                        .apply_to(file)
                        .map_err(|column| StoreError::InvalidColumn {
                            table: "job_files",
                            column: column.to_string(),
                        })?;
                }
            }
        }
        Ok(())
    }

    fn delete_by_fingerprint(&self, fingerprint: &Fingerprint) -> StoreResult<bool> {
        self.check_available()?;
        self.record(Statement::Delete {
            fingerprint: *fingerprint,
        });
        let mut tables = self.tables.write();
        let Some(id) = tables.by_fingerprint.remove(fingerprint) else {
            return Ok(false);
        };
        tables.jobs.remove(&id);
        tables.files.remove(&id);
        Ok(true)
    }

    fn correct_transient_statuses(&self) -> StoreResult<u64> {
        self.check_available()?;
        self.record(Statement::CorrectTransient);
        let mut tables = self.tables.write();
        let mut changed = 0;
        for record in tables.jobs.values_mut() {
            let before = record.clone();
            record.correct_for_exit();
            if *record != before {
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn fetch_job_snapshots(&self, ids: &[JobId]) -> StoreResult<HashMap<JobId, JobRecord>> {
        self.check_available()?;
        self.record(Statement::FetchJobs { ids: ids.to_vec() });
        let tables = self.tables.read();
        Ok(ids
            .iter()
            .filter_map(|id| tables.jobs.get(id).map(|record| (*id, record.clone())))
            .collect())
    }

    fn fetch_file_snapshots(&self, parent: JobId) -> StoreResult<HashMap<FileIndex, FileRecord>> {
        self.check_available()?;
        self.record(Statement::FetchFiles { parent });
        let tables = self.tables.read();
        Ok(tables
            .files
            .get(&parent)
            .map(|files| files.iter().map(|(i, f)| (*i, f.clone())).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmirror_model::{FieldValue, JobStatus};

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::from_bytes([byte; 20])
    }

    #[test]
    fn insert_assigns_increasing_keys() {
        let store = MemoryStore::new();
        let ids = store
            .insert_batch(&[JobRecord::new(fp(1), "a"), JobRecord::new(fp(2), "b")])
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[&fp(1)], ids[&fp(2)]);
        assert_eq!(store.jobs().len(), 2);
    }

    #[test]
    fn duplicate_insert_is_integrity_violation() {
        let store = MemoryStore::new();
        store.insert_batch(&[JobRecord::new(fp(1), "a")]).unwrap();

        let err = store
            .insert_batch(&[JobRecord::new(fp(2), "b"), JobRecord::new(fp(1), "a")])
            .unwrap_err();
        match err {
            StoreError::Integrity { fingerprint, .. } => assert_eq!(fingerprint, Some(fp(1))),
            other => panic!("unexpected error {other:?}"),
        }
        // Nothing from the failed batch was written.
        assert!(store.job(&fp(2)).is_none());
    }

    #[test]
    fn files_require_parent() {
        let store = MemoryStore::new();
        let err = store
            .insert_files(JobId(99), &[FileRecord::new(FileIndex(0), "a.mkv", 1)])
            .unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn update_rejects_insert_only_column() {
        let store = MemoryStore::new();
        let id = store.seed(JobRecord::new(fp(1), "a"));
        let changes = ChangeSet::new().with("fingerprint", FieldValue::Text("x".into()));
        let err = store.update_fields(id, &changes).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn delete_cascades_to_files() {
        let store = MemoryStore::new();
        let id = store.seed(JobRecord::new(fp(1), "a"));
        store
            .insert_files(id, &[FileRecord::new(FileIndex(0), "a.mkv", 1)])
            .unwrap();
        assert_eq!(store.file_count(), 1);

        assert!(store.delete_by_fingerprint(&fp(1)).unwrap());
        assert_eq!(store.file_count(), 0);
        assert!(!store.delete_by_fingerprint(&fp(1)).unwrap());
    }

    #[test]
    fn correction_is_idempotent() {
        let store = MemoryStore::new();
        let mut downloading = JobRecord::new(fp(1), "a");
        downloading.status = JobStatus::Downloading;
        downloading.seeds = 3;
        store.seed(downloading);
        let mut paused = JobRecord::new(fp(2), "b");
        paused.status = JobStatus::Paused;
        store.seed(paused);

        assert_eq!(store.correct_transient_statuses().unwrap(), 1);
        assert_eq!(store.correct_transient_statuses().unwrap(), 0);
        let (_, row) = store.job(&fp(1)).unwrap();
        assert_eq!(row.status, JobStatus::Paused);
        assert_eq!(row.seeds, 0);
    }

    #[test]
    fn offline_store_rejects_everything() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(store.insert_batch(&[JobRecord::new(fp(1), "a")]).unwrap_err().is_transient());
        assert!(store.correct_transient_statuses().is_err());
        assert!(store.statements().is_empty());
    }
}
