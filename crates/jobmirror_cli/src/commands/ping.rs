//! Ping command implementation.

use super::open_store;
use jobmirror_store::JobStore;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Runs the ping command.
pub fn run(path: &Path, prefix: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!("Pinging store at {:?}", path);
    let started = Instant::now();
    let store = open_store(path, prefix)?;
    if !store.ping() {
        return Err(format!("Store at {:?} does not answer", path).into());
    }
    println!("ok ({:?})", started.elapsed());
    Ok(())
}
