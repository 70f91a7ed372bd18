//! Property-based test generators using proptest.

use jobmirror_model::{
    FileIndex, FileRecord, Fingerprint, JobRecord, JobStatus, FINGERPRINT_LEN, PROGRESS_COMPLETE,
};
use proptest::prelude::*;

/// Strategy for arbitrary fingerprints.
pub fn fingerprint_strategy() -> impl Strategy<Value = Fingerprint> {
    prop::array::uniform20(any::<u8>()).prop_map(Fingerprint::from_bytes)
}

/// Strategy for any status.
pub fn status_strategy() -> impl Strategy<Value = JobStatus> {
    prop::sample::select(JobStatus::ALL.to_vec())
}

/// Strategy for plausible job records.
pub fn job_record_strategy() -> impl Strategy<Value = JobRecord> {
    (
        fingerprint_strategy(),
        "[a-zA-Z0-9 ._-]{1,40}",
        0i64..1 << 40,
        0..=PROGRESS_COMPLETE,
        (0i32..200, 0i32..2000, 0i32..200, 0i32..2000),
        status_strategy(),
    )
        .prop_map(|(fingerprint, name, size, progress, counters, status)| {
            let (seeds, total_seeds, leechers, total_leechers) = counters;
            let mut record = JobRecord::new(fingerprint, name);
            record.size = size;
            record.progress = progress;
            record.remaining = size - size * i64::from(progress) / i64::from(PROGRESS_COMPLETE);
            record.seeds = seeds;
            record.total_seeds = total_seeds;
            record.leechers = leechers;
            record.total_leechers = total_leechers;
            record.status = status;
            record.save_path = "/downloads".into();
            record
        })
}

/// Strategy for the file list of one job, indexed from zero.
pub fn file_list_strategy(max_files: usize) -> impl Strategy<Value = Vec<FileRecord>> {
    prop::collection::vec(
        (
            "[a-z]{1,12}\\.(mkv|mp4|srt|nfo|txt)",
            1i64..1 << 32,
            0i32..8,
            0..=PROGRESS_COMPLETE,
        ),
        0..=max_files,
    )
    .prop_map(|files| {
        files
            .into_iter()
            .zip(0..)
            .map(|((path, size, priority, progress), index)| {
                let mut file = FileRecord::new(FileIndex(index), path, size);
                file.priority = priority;
                file.progress = progress;
                file
            })
            .collect()
    })
}
