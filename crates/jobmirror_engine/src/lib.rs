//! # jobmirror engine
//!
//! Keeps a relational store consistent with a set of live, externally owned
//! download jobs.
//!
//! This crate provides:
//! - A registry of jobs waiting for their first insert
//! - Field-level change detection against persisted snapshots
//! - Store health tracking with one event per connection transition
//! - A commit scheduler with exponential backoff
//! - The sync engine and the coordinator task that owns it
//!
//! ## Architecture
//!
//! Upstream code holds an [`EngineHandle`]. Handle calls only post a
//! [`Notification`] on a bounded channel. A single coordinator task owns the
//! [`SyncEngine`] and its [`EntityRegistry`], applies notifications in order
//! and is the only code that writes to the store:
//!
//! 1. Commit cycles insert pending jobs, or promote jobs already stored
//! 2. Bulk updates write only the columns that changed
//! 3. Removals delete by fingerprint, whether committed or not
//! 4. On shutdown, transient statuses are corrected in the store
//!
//! ## Key Invariants
//!
//! - A fingerprint is never inserted twice
//! - File rows are written only after their parent row exists
//! - A failed write leaves the job pending or dirty, never forgotten
//! - Connection transitions are reported once each

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod detector;
mod engine;
mod error;
mod health;
mod registry;
mod scheduler;

pub use config::{EngineConfig, FileFilter};
pub use coordinator::{EngineHandle, MirrorService, Notification};
pub use detector::ChangeDetector;
pub use engine::{CycleReport, EngineStats, JobState, SyncEngine};
pub use error::{EngineError, EngineResult};
pub use health::{ConnectionEvent, StoreHealthMonitor};
pub use registry::EntityRegistry;
pub use scheduler::CommitScheduler;
