use crate::model::{JobId, RunId};

/// Set holding every known run id.
pub const RUNS: &str = "runs";

const QUARANTINE_SUFFIX: &str = ":quarantine";

pub fn run(run_id: RunId) -> String {
    format!("run:{run_id}")
}

pub fn run_repos(run_id: RunId) -> String {
    format!("run:{run_id}:repos")
}

pub fn run_jobs(run_id: RunId) -> String {
    format!("run:{run_id}:jobs")
}

pub fn job_index(run_id: RunId) -> String {
    format!("run:{run_id}:job_index")
}

pub fn job(run_id: RunId, job_id: JobId) -> String {
    format!("run:{run_id}:job:{job_id}")
}

/// Instruction queue consumed by a worker runtime.
pub fn worker_jobs(worker: &str) -> String {
    format!("jobs:{worker}")
}

/// Result queue drained by the collector.
pub fn worker_results(worker: &str) -> String {
    format!("results:{worker}")
}

/// Parking list for entries that could not be decoded.
pub fn quarantine(queue_key: &str) -> String {
    format!("{queue_key}{QUARANTINE_SUFFIX}")
}

pub fn github_meta(full_name: &str) -> String {
    format!("gh:repo:{full_name}:meta")
}

pub fn github_languages(full_name: &str) -> String {
    format!("gh:repo:{full_name}:languages")
}
