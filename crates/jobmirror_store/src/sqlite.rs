//! SQLite-backed store.

use crate::error::{StoreError, StoreResult};
use crate::store::{FileChange, JobStore};
use jobmirror_model::{
    ChangeSet, FieldValue, FileIndex, FileRecord, Fingerprint, JobId, JobRecord, JobStatus,
    Snapshot, PROGRESS_COMPLETE,
};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Upper bound on bound parameters per `IN (...)` query.
const MAX_IN_PARAMS: usize = 500;

/// Options for opening a [`SqliteStore`].
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// Database file. `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    /// Prefix for table names, empty by default.
    pub table_prefix: String,
    /// How long a call may wait on a locked database.
    pub busy_timeout: Duration,
}

impl SqliteOptions {
    /// Options for a database file.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Options for an in-memory database.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Sets the table prefix.
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Sets the busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            path: None,
            table_prefix: String::new(),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// A [`JobStore`] backed by SQLite.
///
/// Two tables are used: `<prefix>jobs` keyed by an autoincrement id with a
/// unique `hash` column, and `<prefix>job_files` referencing it with
/// `ON DELETE CASCADE`.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    jobs_table: String,
    files_table: String,
}

impl SqliteStore {
    /// Opens (and migrates) a store.
    ///
    /// Fails with [`StoreError::InvalidIdentifier`] if the table prefix is
    /// not a plain SQL identifier.
    pub fn open(options: SqliteOptions) -> StoreResult<Self> {
        if !is_identifier_fragment(&options.table_prefix) {
            return Err(StoreError::InvalidIdentifier(options.table_prefix));
        }
        let conn = match &options.path {
            Some(path) => {
                if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                    std::fs::create_dir_all(dir)?;
                }
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(options.busy_timeout)?;
        let store = Self {
            conn: Mutex::new(conn),
            jobs_table: format!("{}jobs", options.table_prefix),
            files_table: format!("{}job_files", options.table_prefix),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(SqliteOptions::in_memory())
    }

    fn migrate(&self) -> StoreResult<()> {
        let jobs = &self.jobs_table;
        let files = &self.files_table;
        self.conn.lock().execute_batch(&format!(
            r#"
            PRAGMA foreign_keys=ON;
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;

            CREATE TABLE IF NOT EXISTS {jobs} (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              hash TEXT NOT NULL UNIQUE,
              added_on INTEGER NOT NULL,
              name TEXT NOT NULL,
              size INTEGER NOT NULL,
              progress INTEGER NOT NULL,
              eta INTEGER NOT NULL,
              remaining INTEGER NOT NULL,
              seeds INTEGER NOT NULL,
              total_seeds INTEGER NOT NULL,
              leechers INTEGER NOT NULL,
              total_leechers INTEGER NOT NULL,
              status INTEGER NOT NULL,
              save_path TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {files} (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              job_id INTEGER NOT NULL REFERENCES {jobs}(id) ON DELETE CASCADE,
              file_index INTEGER NOT NULL,
              path TEXT NOT NULL,
              size INTEGER NOT NULL,
              priority INTEGER NOT NULL,
              progress INTEGER NOT NULL,
              availability REAL NOT NULL,
              UNIQUE (job_id, file_index)
            );

            CREATE INDEX IF NOT EXISTS idx_{jobs}_status ON {jobs}(status);
            "#
        ))?;
        Ok(())
    }

    /// Lists every stored job ordered by key.
    pub fn list_jobs(&self) -> StoreResult<Vec<(JobId, JobRecord)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM {} ORDER BY id",
            self.jobs_table
        ))?;
        let raw = stmt
            .query_map([], RawJob::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawJob::decode).collect()
    }

    /// Returns the stored row of a job.
    pub fn job(&self, fingerprint: &Fingerprint) -> StoreResult<Option<(JobId, JobRecord)>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM {} WHERE hash = ?1", self.jobs_table),
                params![fingerprint.to_hex()],
                RawJob::from_row,
            )
            .optional()?;
        raw.map(RawJob::decode).transpose()
    }

    /// Lists the stored files of a job ordered by index.
    pub fn list_files(&self, parent: JobId) -> StoreResult<Vec<FileRecord>> {
        let mut files: Vec<_> = self.fetch_file_snapshots(parent)?.into_values().collect();
        files.sort_by_key(|file| file.index);
        Ok(files)
    }

    fn select_ids(
        conn: &Connection,
        table: &str,
        fingerprints: &[Fingerprint],
    ) -> StoreResult<HashMap<Fingerprint, JobId>> {
        let mut found = HashMap::with_capacity(fingerprints.len());
        for chunk in fingerprints.chunks(MAX_IN_PARAMS) {
            let sql = format!(
                "SELECT hash, id FROM {table} WHERE hash IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter().map(Fingerprint::to_hex)), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (hash, id) in rows {
                found.insert(Fingerprint::from_hex(&hash)?, JobId(id));
            }
        }
        Ok(found)
    }

    fn assignments<S: Snapshot>(
        table: &'static str,
        changes: &ChangeSet,
    ) -> StoreResult<(String, Vec<Value>)> {
        let mut columns = Vec::with_capacity(changes.len());
        let mut values = Vec::with_capacity(changes.len() + 2);
        for (position, (column, value)) in changes.iter().enumerate() {
            if !S::is_mutable_column(column) {
                return Err(StoreError::InvalidColumn {
                    table,
                    column: column.to_string(),
                });
            }
            columns.push(format!("{column} = ?{}", position + 1));
            values.push(to_sql_value(value));
        }
        Ok((columns.join(", "), values))
    }
}

impl JobStore for SqliteStore {
    fn ping(&self) -> bool {
        self.conn
            .lock()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    fn exists_by_fingerprint(
        &self,
        fingerprints: &[Fingerprint],
    ) -> StoreResult<HashMap<Fingerprint, JobId>> {
        if fingerprints.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.conn.lock();
        Self::select_ids(&conn, &self.jobs_table, fingerprints)
    }

    fn insert_batch(&self, jobs: &[JobRecord]) -> StoreResult<HashMap<Fingerprint, JobId>> {
        if jobs.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (hash, added_on, name, size, progress, eta, remaining, seeds, \
                 total_seeds, leechers, total_leechers, status, save_path) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                self.jobs_table
            ))?;
            for job in jobs {
                stmt.execute(params![
                    job.fingerprint.to_hex(),
                    job.added_on,
                    job.name,
                    job.size,
                    job.progress,
                    job.eta,
                    job.remaining,
                    job.seeds,
                    job.total_seeds,
                    job.leechers,
                    job.total_leechers,
                    job.status.code(),
                    job.save_path,
                ])
                .map_err(|e| match StoreError::from(e) {
                    StoreError::Integrity { message, .. } => {
                        StoreError::integrity(job.fingerprint, message)
                    }
                    other => other,
                })?;
            }
        }
        let fingerprints: Vec<_> = jobs.iter().map(|job| job.fingerprint).collect();
        let ids = Self::select_ids(&tx, &self.jobs_table, &fingerprints)?;
        tx.commit()?;
        debug!(count = jobs.len(), "inserted job rows");
        Ok(ids)
    }

    fn update_fields(&self, id: JobId, changes: &ChangeSet) -> StoreResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let (set, mut values) = Self::assignments::<JobRecord>("jobs", changes)?;
        values.push(Value::Integer(id.0));
        let sql = format!(
            "UPDATE {} SET {set} WHERE id = ?{}",
            self.jobs_table,
            values.len()
        );
        self.conn.lock().execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    fn insert_files(&self, parent: JobId, files: &[FileRecord]) -> StoreResult<()> {
        if files.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (job_id, file_index, path, size, priority, progress, availability) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                self.files_table
            ))?;
            for file in files {
                stmt.execute(params![
                    parent.0,
                    file.index.0,
                    file.path,
                    file.size,
                    file.priority,
                    file.progress,
                    file.availability,
                ])?;
            }
        }
        tx.commit()?;
        debug!(%parent, count = files.len(), "inserted file rows");
        Ok(())
    }

    fn update_file_fields(&self, parent: JobId, changes: &[FileChange]) -> StoreResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (index, change) in changes {
            if change.is_empty() {
                continue;
            }
            let (set, mut values) = Self::assignments::<FileRecord>("job_files", change)?;
            values.push(Value::Integer(parent.0));
            values.push(Value::Integer(i64::from(index.0)));
            let sql = format!(
                "UPDATE {} SET {set} WHERE job_id = ?{} AND file_index = ?{}",
                self.files_table,
                values.len() - 1,
                values.len()
            );
            tx.execute(&sql, params_from_iter(values))?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_by_fingerprint(&self, fingerprint: &Fingerprint) -> StoreResult<bool> {
        let deleted = self.conn.lock().execute(
            &format!("DELETE FROM {} WHERE hash = ?1", self.jobs_table),
            params![fingerprint.to_hex()],
        )?;
        Ok(deleted > 0)
    }

    fn correct_transient_statuses(&self) -> StoreResult<u64> {
        let transient = JobStatus::TRANSIENT
            .iter()
            .map(|status| status.code().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {table} SET \
               status = CASE WHEN status IN ({transient}) \
                 THEN CASE WHEN progress >= {complete} THEN {finished} ELSE {paused} END \
                 ELSE status END, \
               seeds = 0, total_seeds = 0, leechers = 0, total_leechers = 0 \
             WHERE status IN ({transient}) \
               OR seeds <> 0 OR total_seeds <> 0 OR leechers <> 0 OR total_leechers <> 0",
            table = self.jobs_table,
            complete = PROGRESS_COMPLETE,
            finished = JobStatus::Finished.code(),
            paused = JobStatus::Paused.code(),
        );
        let changed = self.conn.lock().execute(&sql, [])?;
        Ok(changed as u64)
    }

    fn fetch_job_snapshots(&self, ids: &[JobId]) -> StoreResult<HashMap<JobId, JobRecord>> {
        let conn = self.conn.lock();
        let mut found = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_IN_PARAMS) {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM {} WHERE id IN ({})",
                self.jobs_table,
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let raw = stmt
                .query_map(params_from_iter(chunk.iter().map(|id| id.0)), RawJob::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            for row in raw {
                let (id, record) = row.decode()?;
                found.insert(id, record);
            }
        }
        Ok(found)
    }

    fn fetch_file_snapshots(&self, parent: JobId) -> StoreResult<HashMap<FileIndex, FileRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT file_index, path, size, priority, progress, availability \
             FROM {} WHERE job_id = ?1",
            self.files_table
        ))?;
        let files = stmt
            .query_map(params![parent.0], |row| {
                Ok(FileRecord {
                    index: FileIndex(row.get(0)?),
                    path: row.get(1)?,
                    size: row.get(2)?,
                    priority: row.get(3)?,
                    progress: row.get(4)?,
                    availability: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(files.into_iter().map(|file| (file.index, file)).collect())
    }
}

const JOB_COLUMNS: &str = "id, hash, added_on, name, size, progress, eta, remaining, seeds, \
                           total_seeds, leechers, total_leechers, status, save_path";

/// A job row before its hash and status are decoded.
struct RawJob {
    id: i64,
    hash: String,
    status: i64,
    record: JobRecord,
}

impl RawJob {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let mut record = JobRecord::new(Fingerprint::from_bytes([0; 20]), row.get::<_, String>(3)?);
        record.added_on = row.get(2)?;
        record.size = row.get(4)?;
        record.progress = row.get(5)?;
        record.eta = row.get(6)?;
        record.remaining = row.get(7)?;
        record.seeds = row.get(8)?;
        record.total_seeds = row.get(9)?;
        record.leechers = row.get(10)?;
        record.total_leechers = row.get(11)?;
        record.save_path = row.get(13)?;
        Ok(Self {
            id: row.get(0)?,
            hash: row.get(1)?,
            status: row.get(12)?,
            record,
        })
    }

    fn decode(self) -> StoreResult<(JobId, JobRecord)> {
        let mut record = self.record;
        record.fingerprint = Fingerprint::from_hex(&self.hash)?;
        record.status = JobStatus::from_code(self.status)?;
        Ok((JobId(self.id), record))
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn to_sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(text) => Value::Text(text.clone()),
        FieldValue::Int(value) => Value::Integer(*value),
        FieldValue::Real(value) => Value::Real(*value),
        FieldValue::Status(status) => Value::Integer(status.code()),
    }
}

/// Accepts the empty string or `[A-Za-z_][A-Za-z0-9_]*`.
fn is_identifier_fragment(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        None => true,
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::from_bytes([byte; 20])
    }

    fn job(byte: u8, status: JobStatus) -> JobRecord {
        let mut record = JobRecord::new(fp(byte), format!("job-{byte}"));
        record.status = status;
        record.save_path = "/downloads".into();
        record
    }

    #[test]
    fn rejects_bad_prefix() {
        let err = SqliteStore::open(SqliteOptions::in_memory().with_table_prefix("x; DROP"))
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(SqliteStore::open(SqliteOptions::in_memory().with_table_prefix("qm_")).is_ok());
    }

    #[test]
    fn insert_then_lookup() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.ping());

        let ids = store
            .insert_batch(&[job(1, JobStatus::Downloading), job(2, JobStatus::Paused)])
            .unwrap();
        assert_eq!(ids.len(), 2);

        let found = store.exists_by_fingerprint(&[fp(1), fp(3)]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&fp(1)], ids[&fp(1)]);

        let (_, row) = store.job(&fp(1)).unwrap().unwrap();
        assert_eq!(row, job(1, JobStatus::Downloading));
    }

    #[test]
    fn duplicate_insert_names_fingerprint() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_batch(&[job(1, JobStatus::Paused)]).unwrap();
        let err = store
            .insert_batch(&[job(2, JobStatus::Paused), job(1, JobStatus::Paused)])
            .unwrap_err();
        match err {
            StoreError::Integrity { fingerprint, .. } => assert_eq!(fingerprint, Some(fp(1))),
            other => panic!("unexpected error {other:?}"),
        }
        // The transaction rolled back the first row of the batch.
        assert!(store.job(&fp(2)).unwrap().is_none());
    }

    #[test]
    fn sparse_update_touches_named_columns() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = store.insert_batch(&[job(1, JobStatus::Downloading)]).unwrap();
        let id = ids[&fp(1)];

        let changes = ChangeSet::new()
            .with("status", FieldValue::Status(JobStatus::Finished))
            .with("progress", FieldValue::Int(1000));
        store.update_fields(id, &changes).unwrap();

        let snapshot = store.fetch_job_snapshots(&[id]).unwrap();
        assert_eq!(snapshot[&id].status, JobStatus::Finished);
        assert_eq!(snapshot[&id].progress, 1000);
        assert_eq!(snapshot[&id].name, "job-1");
    }

    #[test]
    fn update_rejects_unknown_column() {
        let store = SqliteStore::open_in_memory().unwrap();
        let changes = ChangeSet::new().with("hash", FieldValue::Text("x".into()));
        let err = store.update_fields(JobId(1), &changes).unwrap_err();
        assert!(matches!(err, StoreError::InvalidColumn { .. }));
    }

    #[test]
    fn files_follow_parent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let orphan = store.insert_files(JobId(42), &[FileRecord::new(FileIndex(0), "a.mkv", 5)]);
        assert!(orphan.unwrap_err().is_integrity());

        let id = store.insert_batch(&[job(1, JobStatus::Downloading)]).unwrap()[&fp(1)];
        store
            .insert_files(
                id,
                &[
                    FileRecord::new(FileIndex(0), "a.mkv", 5),
                    FileRecord::new(FileIndex(1), "b.srt", 1),
                ],
            )
            .unwrap();

        let change = ChangeSet::new()
            .with("progress", FieldValue::Int(500))
            .with("availability", FieldValue::Real(0.75));
        store
            .update_file_fields(id, &[(FileIndex(1), change)])
            .unwrap();

        let files = store.list_files(id).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].progress, 500);
        assert_eq!(files[1].availability, 0.75);
        assert_eq!(files[0].progress, 0);

        assert!(store.delete_by_fingerprint(&fp(1)).unwrap());
        assert!(store.list_files(id).unwrap().is_empty());
    }

    #[test]
    fn exit_correction_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut downloading = job(1, JobStatus::Downloading);
        downloading.seeds = 7;
        downloading.total_leechers = 3;
        let mut checking_done = job(2, JobStatus::Checking);
        checking_done.progress = PROGRESS_COMPLETE;
        store
            .insert_batch(&[downloading, checking_done, job(3, JobStatus::Error)])
            .unwrap();

        assert_eq!(store.correct_transient_statuses().unwrap(), 2);
        let first = store.list_jobs().unwrap();
        assert_eq!(store.correct_transient_statuses().unwrap(), 0);
        assert_eq!(store.list_jobs().unwrap(), first);

        let (_, one) = store.job(&fp(1)).unwrap().unwrap();
        assert_eq!(one.status, JobStatus::Paused);
        assert_eq!((one.seeds, one.total_leechers), (0, 0));
        let (_, two) = store.job(&fp(2)).unwrap().unwrap();
        assert_eq!(two.status, JobStatus::Finished);
        let (_, three) = store.job(&fp(3)).unwrap().unwrap();
        assert_eq!(three.status, JobStatus::Error);
    }

    #[test]
    fn file_database_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("mirror.db");
        {
            let store = SqliteStore::open(SqliteOptions::file(&path)).unwrap();
            store.insert_batch(&[job(9, JobStatus::Queued)]).unwrap();
        }
        let store = SqliteStore::open(SqliteOptions::file(&path)).unwrap();
        assert_eq!(store.list_jobs().unwrap().len(), 1);
    }
}
