//! Correct command implementation.

use super::open_store;
use jobmirror_store::JobStore;
use std::path::Path;
use tracing::info;

/// Runs the correct command.
///
/// Only safe while no mirror process is writing to the same store.
pub fn run(path: &Path, prefix: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No database found at {:?}", path).into());
    }
    info!("Correcting transient statuses in {:?}", path);
    let store = open_store(path, prefix)?;
    let changed = store.correct_transient_statuses()?;
    println!("Corrected {} rows", changed);
    Ok(())
}
