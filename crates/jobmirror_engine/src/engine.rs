//! The sync engine: insert, update and delete decisions for mirrored jobs.

use crate::config::EngineConfig;
use crate::detector::ChangeDetector;
use crate::error::{EngineError, EngineResult};
use crate::health::{ConnectionEvent, StoreHealthMonitor};
use crate::registry::EntityRegistry;
use crate::scheduler::CommitScheduler;
use jobmirror_model::{
    ChangeSet, FieldValue, FileIndex, FileRecord, Fingerprint, JobId, JobRecord, JobSource,
};
use jobmirror_store::{JobStore, StoreError, StoreResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Where a job stands with respect to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Neither pending nor stored.
    Untracked,
    /// Waiting for its first insert.
    Pending,
    /// Stored under the given key.
    Committed(JobId),
}

/// Counters accumulated over the engine's lifetime.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Commit cycles started.
    pub cycles_attempted: u64,
    /// Commit cycles that completed without a store failure.
    pub cycles_succeeded: u64,
    /// Commit cycles aborted by a store failure.
    pub cycles_failed: u64,
    /// Jobs inserted.
    pub jobs_inserted: u64,
    /// Jobs found already stored and promoted without an insert.
    pub jobs_promoted: u64,
    /// File rows inserted.
    pub files_inserted: u64,
    /// Job and file update statements issued.
    pub updates_issued: u64,
    /// Delete statements that succeeded.
    pub deletes_issued: u64,
    /// Jobs or files dropped after an integrity violation.
    pub integrity_drops: u64,
    /// Rows changed by the exit-time correction.
    pub rows_corrected: u64,
    /// When the last successful cycle finished.
    pub last_success: Option<Instant>,
    /// Message of the last store failure.
    pub last_error: Option<String>,
}

/// Outcome of one commit cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Jobs inserted in this cycle.
    pub inserted: usize,
    /// Jobs promoted without an insert.
    pub promoted: usize,
    /// File rows inserted.
    pub files_inserted: usize,
    /// Jobs dropped after an integrity violation.
    pub dropped: usize,
    /// Deferred deletes that went through.
    pub deletes: usize,
    /// Jobs put back into the registry for the next cycle.
    pub requeued: usize,
    /// Whether the cycle completed without a store failure.
    pub success: bool,
    /// Wall time of the cycle.
    pub duration: Duration,
}

struct CommittedJob {
    id: JobId,
    job: Arc<dyn JobSource>,
}

type Pending = HashMap<Fingerprint, Arc<dyn JobSource>>;

/// Mirrors upstream jobs into a [`JobStore`].
///
/// The engine is the single writer: every store mutation goes through
/// `&mut self`, and the coordinator task owns the only instance. Upstream
/// threads only touch the shared [`EntityRegistry`].
///
/// # Example
///
/// ```rust
/// use jobmirror_engine::{EngineConfig, JobState, SyncEngine};
/// use jobmirror_store::MemoryStore;
/// use jobmirror_testkit::FakeJob;
/// use jobmirror_model::JobSource;
///
/// let mut engine = SyncEngine::new(EngineConfig::default(), MemoryStore::new()).unwrap();
/// let job = FakeJob::new("debian.iso");
/// engine.on_added(job.clone());
/// assert_eq!(engine.job_state(&job.fingerprint()), JobState::Pending);
///
/// let report = engine.commit_cycle();
/// assert!(report.success);
/// assert_eq!(report.inserted, 1);
/// assert!(matches!(engine.job_state(&job.fingerprint()), JobState::Committed(_)));
/// ```
pub struct SyncEngine<S: JobStore> {
    config: EngineConfig,
    store: S,
    registry: Arc<EntityRegistry>,
    health: StoreHealthMonitor,
    scheduler: CommitScheduler,
    committed: HashMap<Fingerprint, CommittedJob>,
    job_cache: HashMap<JobId, JobRecord>,
    file_cache: HashMap<JobId, HashMap<FileIndex, FileRecord>>,
    dirty: HashSet<Fingerprint>,
    awaiting_files: HashSet<Fingerprint>,
    pending_deletes: HashSet<Fingerprint>,
    stats: EngineStats,
}

impl<S: JobStore> SyncEngine<S> {
    /// Creates an engine over `store`.
    ///
    /// Fails if the configuration is invalid.
    pub fn new(config: EngineConfig, store: S) -> EngineResult<Self> {
        config.validate()?;
        let scheduler =
            CommitScheduler::new(config.commit_interval_base, config.commit_interval_max);
        Ok(Self {
            config,
            store,
            registry: Arc::new(EntityRegistry::new()),
            health: StoreHealthMonitor::new(),
            scheduler,
            committed: HashMap::new(),
            job_cache: HashMap::new(),
            file_cache: HashMap::new(),
            dirty: HashSet::new(),
            awaiting_files: HashSet::new(),
            pending_deletes: HashSet::new(),
            stats: EngineStats::default(),
        })
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The shared registry of pending jobs.
    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// The commit scheduler.
    pub fn scheduler(&self) -> &CommitScheduler {
        &self.scheduler
    }

    /// Subscribes to store connection transitions.
    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.health.subscribe()
    }

    /// Current statistics.
    pub fn stats(&self) -> EngineStats {
        self.stats.clone()
    }

    /// Where `fingerprint` stands.
    pub fn job_state(&self, fingerprint: &Fingerprint) -> JobState {
        if let Some(committed) = self.committed.get(fingerprint) {
            JobState::Committed(committed.id)
        } else if self.registry.contains(fingerprint) {
            JobState::Pending
        } else {
            JobState::Untracked
        }
    }

    /// Number of committed jobs waiting to be re-diffed.
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Number of deletes waiting for the store to come back.
    pub fn deferred_delete_count(&self) -> usize {
        self.pending_deletes.len()
    }

    /// Registers a new upstream job.
    ///
    /// Returns false if the job is already pending or committed.
    pub fn on_added(&mut self, job: Arc<dyn JobSource>) -> bool {
        let fingerprint = job.fingerprint();
        if self.committed.contains_key(&fingerprint) {
            trace!("{fingerprint} already committed");
            return false;
        }
        self.registry.add(fingerprint, job)
    }

    /// Forgets a job and deletes it from the store.
    ///
    /// The delete is keyed by fingerprint, so it is issued for pending jobs
    /// too. A failed delete is retried at the start of later cycles.
    pub fn on_removed(&mut self, fingerprint: Fingerprint) {
        self.registry.remove(&fingerprint);
        self.dirty.remove(&fingerprint);
        self.awaiting_files.remove(&fingerprint);
        if let Some(committed) = self.committed.remove(&fingerprint) {
            self.job_cache.remove(&committed.id);
            self.file_cache.remove(&committed.id);
        }

        match self.store.delete_by_fingerprint(&fingerprint) {
            Ok(existed) => {
                self.stats.deletes_issued += 1;
                self.pending_deletes.remove(&fingerprint);
                debug!("deleted {fingerprint} (row existed: {existed})");
            }
            Err(err) => {
                warn!("delete of {fingerprint} deferred: {err}");
                self.note_failure(&err);
                self.pending_deletes.insert(fingerprint);
            }
        }
    }

    /// Writes the changed fields of committed jobs.
    ///
    /// Pending jobs are skipped since their insert carries current values.
    /// Jobs whose update fails stay dirty and are re-diffed next cycle.
    pub fn on_bulk_updated(&mut self, jobs: &[Arc<dyn JobSource>]) {
        let targets: Vec<Fingerprint> = jobs
            .iter()
            .map(|job| job.fingerprint())
            .filter(|fingerprint| self.committed.contains_key(fingerprint))
            .collect();
        if targets.is_empty() {
            return;
        }
        if !self.health.probe(&self.store) {
            debug!("store unreachable, {} jobs marked dirty", targets.len());
            self.dirty.extend(targets);
            return;
        }
        if let Err(err) = self.sync_committed(targets) {
            warn!("bulk update interrupted: {err}");
            self.note_failure(&err);
        }
    }

    /// Writes a job's new save location.
    ///
    /// Only the `save_path` column is written. A pending job needs no write.
    pub fn on_relocated(&mut self, job: Arc<dyn JobSource>, new_path: String) {
        let fingerprint = job.fingerprint();
        let Some(id) = self.committed.get(&fingerprint).map(|c| c.id) else {
            trace!("{fingerprint} relocated before commit");
            return;
        };

        let changes = ChangeSet::new().with("save_path", FieldValue::Text(new_path));
        match self.store.update_fields(id, &changes) {
            Ok(()) => {
                self.stats.updates_issued += 1;
                if let Some(snapshot) = self.job_cache.get_mut(&id) {
                    if let Err(column) = changes.apply_to(snapshot) {
                        warn!("cached snapshot of {fingerprint} rejected {column}");
                        self.job_cache.remove(&id);
                    }
                }
                debug!("relocated {fingerprint}");
            }
            Err(err) => {
                warn!("relocation of {fingerprint} failed: {err}");
                self.note_failure(&err);
                self.dirty.insert(fingerprint);
            }
        }
    }

    /// Runs one commit cycle unless one is already running.
    ///
    /// Returns `None` when the fire was coalesced. The scheduler is re-armed
    /// from the outcome.
    pub fn fire(&mut self) -> Option<CycleReport> {
        if !self.scheduler.begin() {
            return None;
        }
        let report = self.commit_cycle();
        let next = self.scheduler.finish(report.success);
        trace!("next commit in {next:?}");
        Some(report)
    }

    /// Runs one commit cycle.
    ///
    /// Deferred deletes go first, then pending jobs are promoted or
    /// inserted, then outstanding file inserts and dirty jobs are retried.
    /// A store failure aborts the rest of the cycle; jobs not processed stay
    /// pending.
    pub fn commit_cycle(&mut self) -> CycleReport {
        let started = Instant::now();
        self.stats.cycles_attempted += 1;
        let mut report = CycleReport::default();

        if !self.health.probe(&self.store) {
            self.stats.cycles_failed += 1;
            self.stats.last_error = Some("store unreachable".into());
            report.requeued = self.registry.len();
            report.duration = started.elapsed();
            return report;
        }

        let mut pending = self.registry.drain_pending();
        let outcome = self.run_cycle(&mut pending, &mut report);

        report.requeued = pending.len();
        for (fingerprint, job) in pending {
            self.registry.add(fingerprint, job);
        }

        match outcome {
            Ok(()) => {
                report.success = true;
                self.stats.cycles_succeeded += 1;
                self.stats.last_success = Some(Instant::now());
            }
            Err(err) => {
                warn!("commit cycle aborted: {err}");
                self.note_failure(&err);
                self.stats.cycles_failed += 1;
            }
        }
        report.duration = started.elapsed();

        if report.inserted + report.promoted + report.deletes + report.dropped > 0 {
            info!(
                inserted = report.inserted,
                promoted = report.promoted,
                files = report.files_inserted,
                dropped = report.dropped,
                deletes = report.deletes,
                requeued = report.requeued,
                "commit cycle finished"
            );
        }
        report
    }

    /// Corrects transient statuses and zeroes live counters in the store.
    ///
    /// Runs even when nothing is tracked, since rows of an earlier process
    /// may need it. Returns the number of rows changed.
    pub fn correct_on_exit(&mut self) -> EngineResult<u64> {
        let changed = self.store.correct_transient_statuses().map_err(|err| {
            self.note_failure(&err);
            EngineError::from(err)
        })?;
        for snapshot in self.job_cache.values_mut() {
            snapshot.correct_for_exit();
        }
        self.stats.rows_corrected += changed;
        info!("exit correction changed {changed} rows");
        Ok(changed)
    }

    fn run_cycle(&mut self, pending: &mut Pending, report: &mut CycleReport) -> StoreResult<()> {
        self.retry_deletes(report)?;
        self.commit_pending(pending, report)?;
        self.retry_file_inserts(report)?;
        if !self.dirty.is_empty() {
            let dirty: Vec<_> = self.dirty.iter().copied().collect();
            self.sync_committed(dirty)?;
        }
        Ok(())
    }

    fn retry_deletes(&mut self, report: &mut CycleReport) -> StoreResult<()> {
        let deferred: Vec<_> = self.pending_deletes.iter().copied().collect();
        for fingerprint in deferred {
            match self.store.delete_by_fingerprint(&fingerprint) {
                Ok(_) => {
                    self.pending_deletes.remove(&fingerprint);
                    self.stats.deletes_issued += 1;
                    report.deletes += 1;
                }
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => {
                    error!("dropping deferred delete of {fingerprint}: {err}");
                    self.pending_deletes.remove(&fingerprint);
                }
            }
        }
        Ok(())
    }

    fn commit_pending(&mut self, pending: &mut Pending, report: &mut CycleReport) -> StoreResult<()> {
        if pending.is_empty() {
            return Ok(());
        }

        let fingerprints: Vec<_> = pending.keys().copied().collect();
        let existing = self.store.exists_by_fingerprint(&fingerprints)?;
        for (fingerprint, id) in existing {
            self.promote(pending, fingerprint, id, report);
        }

        let mut batch: Vec<JobRecord> = pending.values().map(|job| job.record()).collect();
        let ids = loop {
            if batch.is_empty() {
                break HashMap::new();
            }
            match self.store.insert_batch(&batch) {
                Ok(ids) => break ids,
                Err(StoreError::Integrity {
                    fingerprint: Some(rejected),
                    message,
                }) if batch.iter().any(|r| r.fingerprint == rejected) => {
                    batch.retain(|r| r.fingerprint != rejected);
                    self.resolve_rejected(pending, rejected, &message, report)?;
                }
                Err(err) if err.is_integrity() => {
                    error!("dropping batch of {} jobs: {err}", batch.len());
                    for record in batch.drain(..) {
                        pending.remove(&record.fingerprint);
                        report.dropped += 1;
                        self.stats.integrity_drops += 1;
                    }
                }
                Err(err) => return Err(err),
            }
        };

        let unresolved: Vec<_> = batch
            .iter()
            .map(|r| r.fingerprint)
            .filter(|fingerprint| !ids.contains_key(fingerprint))
            .collect();
        let mut ids = ids;
        if !unresolved.is_empty() {
            ids.extend(self.store.exists_by_fingerprint(&unresolved)?);
        }

        let mut inserted = Vec::new();
        for record in batch {
            let fingerprint = record.fingerprint;
            let Some(id) = ids.get(&fingerprint).copied() else {
                warn!("no key returned for {fingerprint}, retrying next cycle");
                continue;
            };
            let Some(job) = pending.remove(&fingerprint) else {
                continue;
            };
            self.job_cache.insert(id, record);
            self.committed.insert(fingerprint, CommittedJob { id, job });
            self.stats.jobs_inserted += 1;
            report.inserted += 1;
            inserted.push(fingerprint);
        }
        debug!("inserted {} jobs", inserted.len());

        for (position, fingerprint) in inserted.iter().enumerate() {
            if let Err(err) = self.insert_files_of(fingerprint, report) {
                self.awaiting_files.extend(inserted[position..].iter().copied());
                return Err(err);
            }
        }
        Ok(())
    }

    fn promote(&mut self, pending: &mut Pending, fingerprint: Fingerprint, id: JobId, report: &mut CycleReport) {
        let Some(job) = pending.remove(&fingerprint) else {
            return;
        };
        debug!("{fingerprint} already stored as {id}");
        self.committed.insert(fingerprint, CommittedJob { id, job });
        // The stored row may predate this process; diff it next.
        self.dirty.insert(fingerprint);
        self.stats.jobs_promoted += 1;
        report.promoted += 1;
    }

    fn resolve_rejected(
        &mut self,
        pending: &mut Pending,
        fingerprint: Fingerprint,
        message: &str,
        report: &mut CycleReport,
    ) -> StoreResult<()> {
        match self.store.exists_by_fingerprint(&[fingerprint])?.get(&fingerprint) {
            Some(id) => self.promote(pending, fingerprint, *id, report),
            None => {
                error!("dropping {fingerprint}: {message}");
                pending.remove(&fingerprint);
                report.dropped += 1;
                self.stats.integrity_drops += 1;
            }
        }
        Ok(())
    }

    fn insert_files_of(&mut self, fingerprint: &Fingerprint, report: &mut CycleReport) -> StoreResult<()> {
        let Some(committed) = self.committed.get(fingerprint) else {
            return Ok(());
        };
        let id = committed.id;
        let files = self.mirrored_files(committed.job.as_ref());
        if !files.is_empty() {
            match self.store.insert_files(id, &files) {
                Ok(()) => {}
                Err(err) if err.is_integrity() => {
                    error!("dropping files of {fingerprint}: {err}");
                    self.stats.integrity_drops += 1;
                    self.file_cache.remove(&id);
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
        self.stats.files_inserted += files.len() as u64;
        report.files_inserted += files.len();
        self.file_cache
            .insert(id, files.into_iter().map(|f| (f.index, f)).collect());
        Ok(())
    }

    fn retry_file_inserts(&mut self, report: &mut CycleReport) -> StoreResult<()> {
        let awaiting: Vec<_> = self.awaiting_files.iter().copied().collect();
        for fingerprint in awaiting {
            self.insert_files_of(&fingerprint, report)?;
            self.awaiting_files.remove(&fingerprint);
        }
        Ok(())
    }

    /// Diffs and writes committed jobs and their files.
    ///
    /// Every target is marked dirty until its writes succeed, so a failure
    /// part way leaves the rest dirty for the next cycle. A write the store
    /// rejects as an integrity violation is dropped, not retried.
    fn sync_committed(&mut self, targets: Vec<Fingerprint>) -> StoreResult<()> {
        self.dirty.extend(targets.iter().copied());

        let uncached: Vec<JobId> = targets
            .iter()
            .filter_map(|fingerprint| self.committed.get(fingerprint))
            .map(|committed| committed.id)
            .filter(|id| !self.job_cache.contains_key(id))
            .collect();
        if !uncached.is_empty() {
            let fetched = self.store.fetch_job_snapshots(&uncached)?;
            self.job_cache.extend(fetched);
        }

        for fingerprint in targets {
            match self.sync_job(&fingerprint) {
                Ok(()) => {}
                Err(err) if err.is_integrity() => {
                    error!("dropping changes of {fingerprint}: {err}");
                    self.stats.integrity_drops += 1;
                    // Re-read the stored files before the next diff.
                    if let Some(committed) = self.committed.get(&fingerprint) {
                        self.file_cache.remove(&committed.id);
                    }
                }
                Err(err) => return Err(err),
            }
            self.dirty.remove(&fingerprint);
        }
        Ok(())
    }

    fn sync_job(&mut self, fingerprint: &Fingerprint) -> StoreResult<()> {
        let Some(committed) = self.committed.get(fingerprint) else {
            return Ok(());
        };
        let id = committed.id;
        let job = Arc::clone(&committed.job);

        let Some(snapshot) = self.job_cache.get(&id) else {
            debug!("{fingerprint} has no stored row, skipping");
            return Ok(());
        };
        let changes = ChangeDetector::diff(&job.record(), Some(snapshot));
        if !changes.is_empty() {
            self.store.update_fields(id, &changes)?;
            self.stats.updates_issued += 1;
            trace!("updated {} columns of {fingerprint}", changes.len());
            if let Some(snapshot) = self.job_cache.get_mut(&id) {
                if changes.apply_to(snapshot).is_err() {
                    self.job_cache.remove(&id);
                }
            }
        }

        self.sync_files(id, job.as_ref())
    }

    fn sync_files(&mut self, id: JobId, job: &dyn JobSource) -> StoreResult<()> {
        let current = self.mirrored_files(job);
        if !self.file_cache.contains_key(&id) {
            let fetched = self.store.fetch_file_snapshots(id)?;
            self.file_cache.insert(id, fetched);
        }
        let Some(stored) = self.file_cache.get(&id) else {
            return Ok(());
        };

        let added: Vec<FileRecord> = current
            .iter()
            .filter(|file| !stored.contains_key(&file.index))
            .cloned()
            .collect();
        let changes = ChangeDetector::diff_files(&current, stored);

        if !added.is_empty() {
            self.store.insert_files(id, &added)?;
            self.stats.files_inserted += added.len() as u64;
            if let Some(stored) = self.file_cache.get_mut(&id) {
                stored.extend(added.into_iter().map(|f| (f.index, f)));
            }
        }
        if !changes.is_empty() {
            self.store.update_file_fields(id, &changes)?;
            self.stats.updates_issued += 1;
            if let Some(stored) = self.file_cache.get_mut(&id) {
                for (index, change) in &changes {
                    if let Some(file) = stored.get_mut(index) {
                        if change.apply_to(file).is_err() {
                            stored.remove(index);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn mirrored_files(&self, job: &dyn JobSource) -> Vec<FileRecord> {
        self.config
            .file_filter
            .apply(job.files())
            .into_iter()
            .map(FileRecord::normalized)
            .collect()
    }

    fn note_failure(&mut self, err: &StoreError) {
        if err.is_transient() {
            self.health.observe(false);
        }
        self.stats.last_error = Some(err.to_string());
    }
}

impl<S: JobStore> std::fmt::Debug for SyncEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("pending", &self.registry.len())
            .field("committed", &self.committed.len())
            .field("dirty", &self.dirty.len())
            .field("deferred_deletes", &self.pending_deletes.len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
