//! Integration tests for the sync engine against the memory and SQLite stores.

use jobmirror_engine::{ConnectionEvent, EngineConfig, JobState, SyncEngine};
use jobmirror_model::{FileIndex, JobSource, JobStatus};
use jobmirror_store::{JobStore, MemoryStore, Statement};
use jobmirror_testkit::{FakeJob, TempSqlite};
use std::sync::Arc;
use std::time::Duration;

fn memory_engine() -> (SyncEngine<Arc<MemoryStore>>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(EngineConfig::default(), Arc::clone(&store)).unwrap();
    (engine, store)
}

#[test]
fn downloading_job_lifecycle() {
    let (mut engine, store) = memory_engine();
    let f1 = FakeJob::new("F1").with_files(&[("F1/a.mkv", 700), ("F1/b.srt", 2)]);
    f1.set_status(JobStatus::Downloading);

    engine.on_added(f1.clone());
    let report = engine.commit_cycle();
    assert!(report.success);

    let rows = store.jobs();
    assert_eq!(rows.len(), 1);
    let (id, row) = &rows[0];
    assert_eq!(row.status, JobStatus::Downloading);
    assert_eq!(engine.job_state(&f1.fingerprint()), JobState::Committed(*id));
    assert_eq!(store.files(*id).len(), 2);

    store.clear_statements();
    f1.set_status(JobStatus::Finished);
    engine.on_bulk_updated(&[f1.clone()]);
    assert_eq!(
        store.update_statements(),
        vec![Statement::UpdateJob {
            id: *id,
            columns: vec!["status"],
        }]
    );
    assert_eq!(store.job(&f1.fingerprint()).unwrap().1.status, JobStatus::Finished);

    engine.on_removed(f1.fingerprint());
    assert!(store.jobs().is_empty());
    assert_eq!(store.file_count(), 0);
    assert_eq!(engine.job_state(&f1.fingerprint()), JobState::Untracked);
}

#[test]
fn outage_keeps_job_pending_until_recovery() {
    let (mut engine, store) = memory_engine();
    let f2 = FakeJob::new("F2");
    engine.on_added(f2.clone());

    store.set_available(false);
    let report = engine.fire().unwrap();
    assert!(!report.success);
    assert_eq!(engine.job_state(&f2.fingerprint()), JobState::Pending);
    assert_eq!(engine.scheduler().interval(), Duration::from_millis(2000));

    engine.fire();
    assert_eq!(engine.scheduler().interval(), Duration::from_millis(4000));

    store.set_available(true);
    let report = engine.fire().unwrap();
    assert!(report.success);
    assert_eq!(report.inserted, 1);
    assert_eq!(engine.scheduler().interval(), Duration::from_millis(1000));

    engine.on_added(f2.clone());
    engine.commit_cycle();
    assert_eq!(store.jobs().len(), 1);
}

#[test]
fn duplicate_added_notifications_insert_once() {
    let (mut engine, store) = memory_engine();
    let job = FakeJob::new("dup");

    assert!(engine.on_added(job.clone()));
    assert!(!engine.on_added(job.clone()));
    engine.commit_cycle();
    assert!(!engine.on_added(job.clone()));

    // Another process stored the same job in the meantime.
    engine.registry().add(job.fingerprint(), job.clone());
    let report = engine.commit_cycle();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.promoted, 1);

    let inserts = store
        .statements()
        .into_iter()
        .filter(|s| matches!(s, Statement::InsertJobs { .. }))
        .count();
    assert_eq!(inserts, 1);
    assert!(store
        .exists_by_fingerprint(&[job.fingerprint()])
        .unwrap()
        .contains_key(&job.fingerprint()));
}

#[test]
fn unchanged_jobs_issue_no_updates() {
    let (mut engine, store) = memory_engine();
    let jobs: Vec<_> = (0..5)
        .map(|i| FakeJob::new(format!("job-{i}")).with_files(&[("a.mkv", 1)]))
        .collect();
    for job in &jobs {
        engine.on_added(job.clone());
    }
    engine.commit_cycle();
    store.clear_statements();

    let sources: Vec<Arc<dyn JobSource>> = jobs
        .iter()
        .map(|job| Arc::clone(job) as Arc<dyn JobSource>)
        .collect();
    engine.on_bulk_updated(&sources);
    engine.on_bulk_updated(&sources);
    assert!(store.update_statements().is_empty());
    assert_eq!(engine.stats().updates_issued, 0);
}

#[test]
fn file_updates_are_batched_per_parent() {
    let (mut engine, store) = memory_engine();
    let job = FakeJob::new("season").with_files(&[("e1.mkv", 1), ("e2.mkv", 1), ("e3.mkv", 1)]);
    engine.on_added(job.clone());
    engine.commit_cycle();
    store.clear_statements();

    job.set_file_progress(FileIndex(0), 1000);
    job.set_file_progress(FileIndex(2), 300);
    engine.on_bulk_updated(&[job.clone()]);

    let updates = store.update_statements();
    assert_eq!(updates.len(), 1);
    let Statement::UpdateFiles { parent, indexes } = &updates[0] else {
        panic!("expected a file update, got {updates:?}");
    };
    assert_eq!(indexes, &vec![FileIndex(0), FileIndex(2)]);
    let stored = store.files(*parent);
    assert_eq!(stored[0].progress, 1000);
    assert_eq!(stored[1].progress, 0);
    assert_eq!(stored[2].progress, 300);
}

#[test]
fn removing_a_pending_job_still_deletes_by_fingerprint() {
    let (mut engine, store) = memory_engine();
    let job = FakeJob::new("never-committed");
    engine.on_added(job.clone());
    engine.on_removed(job.fingerprint());

    assert!(store.statements().contains(&Statement::Delete {
        fingerprint: job.fingerprint(),
    }));
    let report = engine.commit_cycle();
    assert_eq!(report.inserted, 0);
    assert!(store.jobs().is_empty());
}

#[test]
fn exit_correction_runs_with_nothing_tracked() {
    let (mut engine, store) = memory_engine();
    let leftover = FakeJob::new("from-last-run");
    leftover.set_status(JobStatus::Checking);
    leftover.set_seeds(4);
    store.seed(leftover.record());

    let done = FakeJob::new("complete");
    done.set_status(JobStatus::Downloading);
    done.set_progress(1000);
    store.seed(done.record());

    assert_eq!(engine.correct_on_exit().unwrap(), 2);
    let first = store.jobs();
    assert_eq!(engine.correct_on_exit().unwrap(), 0);
    assert_eq!(store.jobs(), first);

    let (_, leftover) = store.job(&leftover.fingerprint()).unwrap();
    assert_eq!(leftover.status, JobStatus::Paused);
    assert_eq!(leftover.seeds, 0);
    let (_, done) = store.job(&done.fingerprint()).unwrap();
    assert_eq!(done.status, JobStatus::Finished);
}

#[test]
fn connection_events_fire_once_per_transition() {
    let (mut engine, store) = memory_engine();
    let mut events = engine.subscribe_connection();

    engine.commit_cycle();
    store.set_available(false);
    for _ in 0..4 {
        engine.commit_cycle();
    }
    store.set_available(true);
    engine.commit_cycle();
    engine.commit_cycle();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            ConnectionEvent::Connected,
            ConnectionEvent::Disconnected,
            ConnectionEvent::Connected
        ]
    );
}

#[test]
fn sqlite_end_to_end() {
    let db = TempSqlite::new();
    let job = FakeJob::new("sqlite").with_files(&[("x.mkv", 10), ("y.mkv", 20)]);
    job.set_status(JobStatus::Downloading);
    job.set_seeds(7);
    {
        let mut engine = SyncEngine::new(EngineConfig::default(), &db.store).unwrap();
        engine.on_added(job.clone());
        assert_eq!(engine.commit_cycle().inserted, 1);

        job.set_progress(1000);
        job.set_file_progress(FileIndex(1), 1000);
        engine.on_bulk_updated(&[job.clone()]);
        job.set_save_path("/archive");
        engine.on_relocated(job.clone(), "/archive".into());
        engine.correct_on_exit().unwrap();
    }

    let db = db.reopen();
    let (id, row) = db.job(&job.fingerprint()).unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Finished);
    assert_eq!(row.seeds, 0);
    assert_eq!(row.progress, 1000);
    assert_eq!(row.save_path, "/archive");
    let files = db.list_files(id).unwrap();
    assert_eq!(files[1].progress, 1000);

    // A restarted process promotes the stored row instead of inserting it.
    let mut engine = SyncEngine::new(EngineConfig::default(), &db.store).unwrap();
    engine.on_added(job.clone());
    let report = engine.commit_cycle();
    assert_eq!(report.promoted, 1);
    assert_eq!(db.list_jobs().unwrap().len(), 1);

    engine.on_removed(job.fingerprint());
    assert!(db.job(&job.fingerprint()).unwrap().is_none());
    assert!(db.list_files(id).unwrap().is_empty());
}
