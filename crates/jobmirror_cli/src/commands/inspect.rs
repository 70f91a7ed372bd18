//! Inspect command implementation.

use super::open_store;
use jobmirror_model::{FileRecord, JobRecord, JobStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Number of stored jobs.
    pub job_count: usize,
    /// Number of stored files.
    pub file_count: usize,
    /// Jobs per status name.
    pub statuses: BTreeMap<String, usize>,
    /// Jobs still in a transient status.
    pub transient_count: usize,
    /// The stored jobs.
    pub jobs: Vec<JobEntry>,
}

/// One stored job.
#[derive(Debug, Serialize)]
pub struct JobEntry {
    /// Surrogate key.
    pub id: i64,
    /// Stored values.
    #[serde(flatten)]
    pub record: JobRecord,
    /// Stored files (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileRecord>>,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    prefix: &str,
    show_files: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No database found at {:?}", path).into());
    }
    let store = open_store(path, prefix)?;

    let mut result = InspectResult {
        path: path.display().to_string(),
        job_count: 0,
        file_count: 0,
        statuses: BTreeMap::new(),
        transient_count: 0,
        jobs: Vec::new(),
    };

    for (id, record) in store.list_jobs()? {
        let files = store.list_files(id)?;
        result.file_count += files.len();
        *result.statuses.entry(record.status.to_string()).or_default() += 1;
        if record.status.is_transient() {
            result.transient_count += 1;
        }
        result.jobs.push(JobEntry {
            id: id.0,
            record,
            files: show_files.then_some(files),
        });
    }
    result.job_count = result.jobs.len();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Database: {}", result.path);
    println!("Jobs: {}", result.job_count);
    println!("Files: {}", result.file_count);
    if result.transient_count > 0 {
        println!(
            "Transient: {} (run `correct` if no mirror is running)",
            result.transient_count
        );
    }

    if !result.statuses.is_empty() {
        println!("\nBy status:");
        for (status, count) in &result.statuses {
            println!("  {:<20} {}", status, count);
        }
    }

    if result.jobs.is_empty() {
        return;
    }
    println!("\n{:>6}  {:<40}  {:<18}  {:>7}  NAME", "ID", "HASH", "STATUS", "DONE");
    for job in &result.jobs {
        let record = &job.record;
        println!(
            "{:>6}  {}  {:<18}  {:>6.1}%  {}",
            job.id,
            record.fingerprint,
            status_label(record.status),
            f64::from(record.progress) / 10.0,
            record.name
        );
        for file in job.files.iter().flatten() {
            println!(
                "{:>6}  {:>4}  {:>6.1}%  {}",
                "",
                file.index.0,
                f64::from(file.progress) / 10.0,
                file.path
            );
        }
    }
}

fn status_label(status: JobStatus) -> String {
    if status.is_transient() {
        format!("{status}*")
    } else {
        status.to_string()
    }
}
