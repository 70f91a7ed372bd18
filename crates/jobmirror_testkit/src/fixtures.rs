//! Test fixtures: fake upstream jobs and temporary stores.

use jobmirror_model::{
    FileIndex, FileRecord, Fingerprint, JobRecord, JobSource, JobStatus, FINGERPRINT_LEN,
};
use jobmirror_store::{SqliteOptions, SqliteStore};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Timestamp every fake job reports as its creation time.
pub const FAKE_ADDED_ON: i64 = 1_700_000_000;

/// Derives a stable fingerprint from a name.
pub fn fingerprint_of(name: &str) -> Fingerprint {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; FINGERPRINT_LEN];
    bytes.copy_from_slice(&digest[..FINGERPRINT_LEN]);
    Fingerprint::from_bytes(bytes)
}

#[derive(Debug)]
struct FakeState {
    record: JobRecord,
    files: Vec<FileRecord>,
}

/// An upstream job held by tests.
///
/// Fields can be changed through `&self` from any thread, the way a real
/// download engine mutates its jobs behind the mirror's back.
#[derive(Debug)]
pub struct FakeJob {
    fingerprint: Fingerprint,
    state: RwLock<FakeState>,
}

impl FakeJob {
    /// Creates a queued job whose fingerprint is derived from `name`.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Self::with_fingerprint(fingerprint_of(&name), name)
    }

    /// Creates a queued job with an explicit fingerprint.
    pub fn with_fingerprint(fingerprint: Fingerprint, name: impl Into<String>) -> Arc<Self> {
        let mut record = JobRecord::new(fingerprint, name);
        record.added_on = FAKE_ADDED_ON;
        record.status = JobStatus::Queued;
        record.save_path = "/downloads".into();
        Arc::new(Self {
            fingerprint,
            state: RwLock::new(FakeState {
                record,
                files: Vec::new(),
            }),
        })
    }

    /// Builder form of [`FakeJob::set_files`].
    pub fn with_files(self: Arc<Self>, files: &[(&str, i64)]) -> Arc<Self> {
        self.set_files(files);
        self
    }

    /// Replaces the file list. Indexes follow slice order and the job size
    /// becomes the sum of the file sizes.
    pub fn set_files(&self, files: &[(&str, i64)]) {
        let mut state = self.state.write();
        state.files = files
            .iter()
            .zip(0..)
            .map(|((path, size), index)| FileRecord::new(FileIndex(index), *path, *size))
            .collect();
        state.record.size = files.iter().map(|(_, size)| size).sum();
    }

    /// Sets the status.
    pub fn set_status(&self, status: JobStatus) {
        self.state.write().record.status = status;
    }

    /// Sets progress in permille.
    pub fn set_progress(&self, progress: i32) {
        self.state.write().record.progress = progress;
    }

    /// Sets the connected seed count.
    pub fn set_seeds(&self, seeds: i32) {
        self.state.write().record.seeds = seeds;
    }

    /// Sets the save location.
    pub fn set_save_path(&self, path: impl Into<String>) {
        self.state.write().record.save_path = path.into();
    }

    /// Sets progress of one file. Unknown indexes are ignored.
    pub fn set_file_progress(&self, index: FileIndex, progress: i32) {
        let mut state = self.state.write();
        if let Some(file) = state.files.iter_mut().find(|f| f.index == index) {
            file.progress = progress;
        }
    }

    /// Sets availability of one file. Unknown indexes are ignored.
    pub fn set_file_availability(&self, index: FileIndex, availability: f64) {
        let mut state = self.state.write();
        if let Some(file) = state.files.iter_mut().find(|f| f.index == index) {
            file.availability = availability;
        }
    }

    /// Applies an arbitrary change to the job record.
    pub fn update(&self, change: impl FnOnce(&mut JobRecord)) {
        change(&mut self.state.write().record);
    }
}

impl JobSource for FakeJob {
    fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    fn record(&self) -> JobRecord {
        self.state.read().record.clone()
    }

    fn files(&self) -> Vec<FileRecord> {
        self.state.read().files.clone()
    }
}

/// A SQLite store in a temporary directory that is removed on drop.
pub struct TempSqlite {
    /// The open store.
    pub store: SqliteStore,
    dir: TempDir,
}

impl TempSqlite {
    /// Creates a fresh database file.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = SqliteStore::open(SqliteOptions::file(dir.path().join("jobs.db")))
            .expect("Failed to open SQLite store");
        Self { store, dir }
    }

    /// Path of the database file.
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("jobs.db")
    }

    /// The temporary directory.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Closes and reopens the store, as a restarted process would.
    pub fn reopen(self) -> Self {
        let Self { store, dir } = self;
        drop(store);
        let store = SqliteStore::open(SqliteOptions::file(dir.path().join("jobs.db")))
            .expect("Failed to reopen SQLite store");
        Self { store, dir }
    }
}

impl Default for TempSqlite {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TempSqlite {
    type Target = SqliteStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}
