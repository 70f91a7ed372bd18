//! CLI command implementations.

pub mod correct;
pub mod inspect;
pub mod mirror;
pub mod ping;

use jobmirror_store::{SqliteOptions, SqliteStore};
use std::path::Path;

/// Opens the store at `path`, creating it if needed.
pub fn open_store(path: &Path, prefix: &str) -> Result<SqliteStore, Box<dyn std::error::Error>> {
    Ok(SqliteStore::open(
        SqliteOptions::file(path).with_table_prefix(prefix),
    )?)
}
