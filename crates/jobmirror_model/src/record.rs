//! Typed snapshot records for jobs and their files.

use crate::field::{Field, FieldValue, Snapshot};
use crate::ids::{FileIndex, Fingerprint};
use crate::status::JobStatus;
use serde::Serialize;

/// Progress value (permille) of a complete job or file.
pub const PROGRESS_COMPLETE: i32 = 1000;

/// Live peer counters. They are zeroed when the observing process exits.
pub const COUNTER_COLUMNS: [&str; 4] = ["seeds", "total_seeds", "leechers", "total_leechers"];

macro_rules! text_field {
    ($column:literal, $name:ident) => {
        Field {
            column: $column,
            get: |r| FieldValue::Text(r.$name.clone()),
            set: |r, v| match v {
                FieldValue::Text(text) => {
                    r.$name = text.clone();
                    true
                }
                _ => false,
            },
        }
    };
}

macro_rules! int_field {
    ($column:literal, $name:ident) => {
        Field {
            column: $column,
            get: |r| FieldValue::Int(i64::from(r.$name)),
            set: |r, v| match v {
                FieldValue::Int(value) => match (*value).try_into() {
                    Ok(value) => {
                        r.$name = value;
                        true
                    }
                    Err(_) => false,
                },
                _ => false,
            },
        }
    };
}

/// Values of one job row.
///
/// `fingerprint` and `added_on` are written once on insert; every other
/// field is listed in [`JobRecord::FIELDS`] and kept in sync by diffing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    /// Natural key.
    pub fingerprint: Fingerprint,
    /// When the upstream engine added the job (unix seconds).
    pub added_on: i64,
    /// Displayed name.
    pub name: String,
    /// Total wanted size in bytes.
    pub size: i64,
    /// Progress in permille.
    pub progress: i32,
    /// Estimated seconds to completion.
    pub eta: i64,
    /// Bytes still missing.
    pub remaining: i64,
    /// Connected seeds.
    pub seeds: i32,
    /// Seeds in the swarm.
    pub total_seeds: i32,
    /// Connected leechers.
    pub leechers: i32,
    /// Leechers in the swarm.
    pub total_leechers: i32,
    /// Current status.
    pub status: JobStatus,
    /// Save location.
    pub save_path: String,
}

impl JobRecord {
    /// Creates a record with zeroed counters and `Unknown` status.
    pub fn new(fingerprint: Fingerprint, name: impl Into<String>) -> Self {
        Self {
            fingerprint,
            added_on: 0,
            name: name.into(),
            size: 0,
            progress: 0,
            eta: 0,
            remaining: 0,
            seeds: 0,
            total_seeds: 0,
            leechers: 0,
            total_leechers: 0,
            status: JobStatus::Unknown,
            save_path: String::new(),
        }
    }

    /// Returns true when the job has all of its data.
    pub fn is_complete(&self) -> bool {
        self.progress >= PROGRESS_COMPLETE
    }

    /// Applies the shutdown correction to this record.
    ///
    /// Transient statuses are replaced by their stable equivalent and the
    /// live counters are zeroed. Applying it twice changes nothing more.
    pub fn correct_for_exit(&mut self) {
        self.status = self.status.stable_equivalent(self.is_complete());
        self.seeds = 0;
        self.total_seeds = 0;
        self.leechers = 0;
        self.total_leechers = 0;
    }
}

impl Snapshot for JobRecord {
    const FIELDS: &'static [Field<Self>] = &[
        text_field!("name", name),
        int_field!("size", size),
        int_field!("progress", progress),
        int_field!("eta", eta),
        int_field!("remaining", remaining),
        int_field!("seeds", seeds),
        int_field!("total_seeds", total_seeds),
        int_field!("leechers", leechers),
        int_field!("total_leechers", total_leechers),
        Field {
            column: "status",
            get: |r| FieldValue::Status(r.status),
            set: |r, v| match v {
                FieldValue::Status(status) => {
                    r.status = *status;
                    true
                }
                _ => false,
            },
        },
        text_field!("save_path", save_path),
    ];
}

/// Values of one file row.
///
/// `index`, `path` and `size` are written once on insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    /// Ordinal inside the parent job.
    pub index: FileIndex,
    /// Path relative to the job's save location.
    pub path: String,
    /// Size in bytes.
    pub size: i64,
    /// Download priority.
    pub priority: i32,
    /// Progress in permille.
    pub progress: i32,
    /// Fraction of the file available in the swarm.
    pub availability: f64,
}

impl FileRecord {
    /// Creates a file record with default priority and no progress.
    pub fn new(index: FileIndex, path: impl Into<String>, size: i64) -> Self {
        Self {
            index,
            path: path.into(),
            size,
            priority: 1,
            progress: 0,
            availability: 0.0,
        }
    }

    /// Maps a NaN availability to 0.0.
    ///
    /// NaN never equals itself and SQLite stores it as NULL.
    pub fn normalized(mut self) -> Self {
        if self.availability.is_nan() {
            self.availability = 0.0;
        }
        self
    }

    /// Lowercased extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(&self.path);
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

impl Snapshot for FileRecord {
    const FIELDS: &'static [Field<Self>] = &[
        int_field!("priority", priority),
        int_field!("progress", progress),
        Field {
            column: "availability",
            get: |r| FieldValue::Real(r.availability),
            set: |r, v| match v {
                FieldValue::Real(value) => {
                    r.availability = *value;
                    true
                }
                _ => false,
            },
        },
    ];
}
