use std::time::Duration;

use thiserror::Error;

use crate::model::RunId;

/// Failures surfaced by the control operations.
///
/// Validation variants are raised before anything is written to the store.
/// Store failures are passed through without retry.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("a run needs at least one repository")]
    EmptyRepos,
    #[error("a run needs at least one worker")]
    EmptyWorkers,
    #[error("repository at position {0} has an empty full_name")]
    UnnamedRepo(usize),
    #[error("repository {0} is listed more than once")]
    DuplicateRepo(String),
    #[error("no such run: {0}")]
    RunNotFound(RunId),
    #[error("no run matches `{0}`")]
    UnknownRun(String),
    #[error("run id prefix `{prefix}` is ambiguous ({count} matches)")]
    AmbiguousRun { prefix: String, count: usize },
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Whether the caller supplied bad input, as opposed to an infrastructure fault.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OrchestratorError::EmptyRepos
                | OrchestratorError::EmptyWorkers
                | OrchestratorError::UnnamedRepo(_)
                | OrchestratorError::DuplicateRepo(_)
        )
    }
}

/// Why a worker failed to produce a result for one instruction.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkerError {
    #[error("timeout after {:.1}s (limit {}s)", .elapsed.as_secs_f64(), .limit.as_secs_f64())]
    Timeout { limit: Duration, elapsed: Duration },
    /// The handler panicked or the producer returned an error.
    #[error("{message}")]
    HandlerPanic { message: String },
    #[error("{reason}")]
    NormalizationFailed { reason: String },
}

impl WorkerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WorkerError::Timeout { .. })
    }
}
