//! Job status enumeration.

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a job as mirrored into the store.
///
/// The discriminants are the values written to the store. They start at 1
/// and must never be renumbered, since existing rows depend on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum JobStatus {
    /// Disk space is being allocated.
    Allocating = 1,
    /// Data is being verified.
    Checking = 2,
    /// Resume data is being verified.
    CheckingResumeData = 3,
    /// Actively downloading.
    Downloading = 4,
    /// Stopped on an error.
    Error = 5,
    /// Download complete.
    Finished = 6,
    /// Downloading, ignoring queue limits.
    ForcedDownloading = 7,
    /// Files are missing on disk.
    MissingFiles = 8,
    /// Data is being moved to a new location.
    Moving = 9,
    /// Paused by the user or on shutdown.
    Paused = 10,
    /// Waiting for a queue slot.
    Queued = 11,
    /// Downloading without connected peers.
    Stalled = 12,
    /// Unrecognised upstream state.
    Unknown = 13,
}

impl JobStatus {
    /// All statuses in store order.
    pub const ALL: [JobStatus; 13] = [
        JobStatus::Allocating,
        JobStatus::Checking,
        JobStatus::CheckingResumeData,
        JobStatus::Downloading,
        JobStatus::Error,
        JobStatus::Finished,
        JobStatus::ForcedDownloading,
        JobStatus::MissingFiles,
        JobStatus::Moving,
        JobStatus::Paused,
        JobStatus::Queued,
        JobStatus::Stalled,
        JobStatus::Unknown,
    ];

    /// Statuses that only make sense while the observing process runs.
    pub const TRANSIENT: [JobStatus; 7] = [
        JobStatus::Allocating,
        JobStatus::Checking,
        JobStatus::CheckingResumeData,
        JobStatus::Downloading,
        JobStatus::ForcedDownloading,
        JobStatus::Moving,
        JobStatus::Queued,
    ];

    /// Returns the stored integer.
    pub const fn code(self) -> i64 {
        self as u8 as i64
    }

    /// Decodes a stored integer.
    pub fn from_code(code: i64) -> ModelResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.code() == code)
            .ok_or(ModelError::UnknownStatus(code))
    }

    /// Returns true if the status must be corrected when the process exits.
    pub fn is_transient(self) -> bool {
        Self::TRANSIENT.contains(&self)
    }

    /// Returns the status a row should carry once nothing observes it.
    ///
    /// Transient statuses become `Finished` for complete jobs and `Paused`
    /// otherwise. Stable statuses are returned unchanged.
    pub fn stable_equivalent(self, complete: bool) -> Self {
        if !self.is_transient() {
            self
        } else if complete {
            JobStatus::Finished
        } else {
            JobStatus::Paused
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
