//! # jobmirror store
//!
//! The relational store interface the sync engine writes through, and its
//! backends.
//!
//! This crate provides:
//! - The [`JobStore`] trait (existence lookup, batch insert, sparse updates,
//!   cascading delete, exit-time correction, snapshot reads)
//! - [`StoreError`] with transient / integrity / configuration classification
//! - [`MemoryStore`] for tests, with failure injection and a statement log
//! - [`SqliteStore`] backed by SQLite
//!
//! ## Design Principles
//!
//! - Every call is one round trip and applies completely or not at all
//! - Jobs are addressed by fingerprint until the store assigns a key
//! - Updates only ever name columns from the snapshot field lists
//! - Stores must be `Send + Sync`; the engine still calls them from a single
//!   writer task

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod sqlite;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, Statement};
pub use sqlite::{SqliteOptions, SqliteStore};
pub use store::{FileChange, JobStore};
