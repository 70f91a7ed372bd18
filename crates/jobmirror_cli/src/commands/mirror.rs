//! Mirror command implementation.
//!
//! Runs the sync engine against a simulated download client: a fixed set of
//! jobs whose progress advances on every tick.

use super::open_store;
use jobmirror_engine::{EngineConfig, EngineStats, FileFilter, MirrorService, SyncEngine};
use jobmirror_model::{
    FileIndex, FileRecord, Fingerprint, JobRecord, JobSource, JobStatus, FINGERPRINT_LEN,
    PROGRESS_COMPLETE,
};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

/// Parameters of a mirror run.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    /// Number of simulated jobs.
    pub jobs: usize,
    /// Number of progress updates.
    pub ticks: u32,
    /// Delay between updates.
    pub tick: Duration,
    /// Extensions to mirror; empty means every file.
    pub extensions: Vec<String>,
}

struct SimulatedJob {
    fingerprint: Fingerprint,
    speed: i32,
    state: RwLock<(JobRecord, Vec<FileRecord>)>,
}

impl SimulatedJob {
    fn new(seq: usize, added_on: i64) -> Self {
        let name = format!("simulated-{seq:04}");
        let digest = Sha256::digest(name.as_bytes());
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&digest[..FINGERPRINT_LEN]);
        let fingerprint = Fingerprint::from_bytes(bytes);

        let files: Vec<FileRecord> = [("mkv", 700_000_000), ("srt", 40_000), ("nfo", 2_000)]
            .iter()
            .zip(0..)
            .map(|((ext, size), index)| {
                FileRecord::new(FileIndex(index), format!("{name}/{name}.{ext}"), *size)
            })
            .collect();

        let mut record = JobRecord::new(fingerprint, name);
        record.added_on = added_on;
        record.size = files.iter().map(|f| f.size).sum();
        record.remaining = record.size;
        record.status = JobStatus::Queued;
        record.save_path = "/downloads".into();

        Self {
            fingerprint,
            speed: 20 + (seq % 7) as i32 * 15,
            state: RwLock::new((record, files)),
        }
    }

    fn tick(&self, tick: u32) {
        let mut state = self.state.write();
        let (record, files) = &mut *state;
        if record.is_complete() {
            record.status = JobStatus::Finished;
            record.seeds = 0;
            record.leechers = 0;
            return;
        }

        record.progress = (record.progress + self.speed).min(PROGRESS_COMPLETE);
        record.remaining =
            record.size - record.size * i64::from(record.progress) / i64::from(PROGRESS_COMPLETE);
        let rate = i64::from(self.speed.max(1));
        record.eta = i64::from(PROGRESS_COMPLETE - record.progress) / rate;
        record.seeds = 3 + (tick % 5) as i32;
        record.total_seeds = 40;
        record.leechers = (tick % 3) as i32;
        record.total_leechers = 12;
        record.status = if record.is_complete() {
            JobStatus::Finished
        } else {
            JobStatus::Downloading
        };
        for file in files.iter_mut() {
            file.progress = record.progress;
            file.availability = 1.0 + f64::from(record.seeds) / 10.0;
        }
    }
}

impl JobSource for SimulatedJob {
    fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    fn record(&self) -> JobRecord {
        self.state.read().0.clone()
    }

    fn files(&self) -> Vec<FileRecord> {
        self.state.read().1.clone()
    }
}

/// Runs the mirror command.
pub fn run(path: &Path, prefix: &str, options: MirrorOptions) -> Result<(), Box<dyn std::error::Error>> {
    info!("Mirroring {} simulated jobs into {:?}", options.jobs, path);
    let store = open_store(path, prefix)?;

    let mut config = EngineConfig::default();
    if !options.extensions.is_empty() {
        config = config.with_file_filter(FileFilter::extensions(&options.extensions));
    }
    let engine = SyncEngine::new(config, store)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let stats = runtime.block_on(simulate(engine, &options))?;
    print_stats(&stats);
    Ok(())
}

async fn simulate<S: jobmirror_store::JobStore + 'static>(
    engine: SyncEngine<S>,
    options: &MirrorOptions,
) -> Result<EngineStats, Box<dyn std::error::Error>> {
    let service = MirrorService::spawn(engine);
    let handle = service.handle();
    let mut events = service.subscribe_connection();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!("Store connection: {:?}", event);
        }
    });

    let added_on = unix_now();
    let jobs: Vec<Arc<SimulatedJob>> = (0..options.jobs)
        .map(|seq| Arc::new(SimulatedJob::new(seq, added_on)))
        .collect();
    for job in &jobs {
        handle.added(Arc::clone(job) as Arc<dyn JobSource>).await?;
    }

    let mut interval = tokio::time::interval(options.tick);
    for tick in 0..options.ticks {
        interval.tick().await;
        for job in &jobs {
            job.tick(tick);
        }
        let changed = jobs
            .iter()
            .map(|job| Arc::clone(job) as Arc<dyn JobSource>)
            .collect();
        handle.bulk_updated(changed).await?;
    }

    if let Some(report) = handle.commit().await? {
        info!("Final cycle: {:?}", report);
    }
    Ok(service.shutdown().await?)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

fn print_stats(stats: &EngineStats) {
    println!("Cycles: {} ok, {} failed", stats.cycles_succeeded, stats.cycles_failed);
    println!("Jobs inserted: {}", stats.jobs_inserted);
    println!("Jobs promoted: {}", stats.jobs_promoted);
    println!("Files inserted: {}", stats.files_inserted);
    println!("Updates issued: {}", stats.updates_issued);
    println!("Rows corrected on exit: {}", stats.rows_corrected);
    if let Some(err) = &stats.last_error {
        println!("Last error: {}", err);
    }
}
