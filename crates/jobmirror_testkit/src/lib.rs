//! # jobmirror testkit
//!
//! Test utilities for jobmirror.
//!
//! This crate provides:
//! - `FakeJob`, an upstream job whose fields tests can change
//! - Temporary SQLite stores with automatic cleanup
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use jobmirror_model::{JobSource, JobStatus};
//! use jobmirror_testkit::prelude::*;
//!
//! let job = FakeJob::new("archlinux.iso").with_files(&[("archlinux.iso", 900)]);
//! job.set_status(JobStatus::Downloading);
//! assert_eq!(job.record().status, JobStatus::Downloading);
//! assert_eq!(job.fingerprint(), fingerprint_of("archlinux.iso"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
