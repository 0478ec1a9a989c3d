//! Tracing and telemetry instrumentation for cbom-bench.
//!
//! Span helpers for the control operations and for worker-side execution,
//! plus `record_*` functions that log an event and, with the `metrics`
//! feature, update the matching Prometheus instrument. Everything here
//! works with and without that feature.
//!
//! # Example
//!
//! ```ignore
//! use cbom_bench::telemetry::{collect_span, record_job_collected};
//! use tracing::Instrument;
//!
//! async {
//!     // ... drain result queues
//!     record_job_collected(run_id, job_id, "w1", "completed");
//! }
//! .instrument(collect_span(run_id))
//! .await;
//! ```

use std::fmt::Display;
use std::time::{Duration, Instant};

use tracing::{info_span, Span};

/// Span for `Start`, `ReexecuteAll` and `RetryIncomplete` dispatch passes.
#[must_use]
pub fn dispatch_span(run_id: impl Display, mode: &'static str) -> Span {
    info_span!("cbom_bench.dispatch", run_id = %run_id, mode = mode)
}

/// Span for one `CollectOnce` pass.
#[must_use]
pub fn collect_span(run_id: impl Display) -> Span {
    info_span!("cbom_bench.collect", run_id = %run_id)
}

#[must_use]
pub fn cancel_span(run_id: impl Display) -> Span {
    info_span!("cbom_bench.cancel", run_id = %run_id)
}

#[must_use]
pub fn retry_span(run_id: impl Display) -> Span {
    info_span!("cbom_bench.retry", run_id = %run_id)
}

/// Span for administrative operations (create, reset, delete).
#[must_use]
pub fn lifecycle_span(operation: &'static str, run_id: impl Display) -> Span {
    info_span!("cbom_bench.lifecycle", operation = operation, run_id = %run_id)
}

/// Span wrapping a worker runtime's handling of one instruction.
#[must_use]
pub fn execute_span(worker: &str, job_id: impl Display, repo: &str) -> Span {
    info_span!(
        "cbom_bench.execute",
        worker = %worker,
        job_id = %job_id,
        repo = %repo,
    )
}

pub fn record_jobs_dispatched(run_id: impl Display, worker: &str, count: usize) {
    tracing::info!(run_id = %run_id, worker = %worker, count = count, "jobs dispatched");

    #[cfg(feature = "metrics")]
    crate::metrics::record_jobs_dispatched(worker, count);
}

pub fn record_job_collected(run_id: impl Display, job_id: impl Display, worker: &str, status: &str) {
    tracing::info!(
        run_id = %run_id,
        job_id = %job_id,
        worker = %worker,
        status = %status,
        "job result collected"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_collected(worker, status);
}

pub fn record_jobs_cancelled(run_id: impl Display, cancelled: usize, dequeued: usize) {
    tracing::info!(
        run_id = %run_id,
        cancelled = cancelled,
        removed_from_queues = dequeued,
        "jobs cancelled"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_jobs_cancelled(cancelled);
}

pub fn record_entry_quarantined(queue: &str, error: impl Display) {
    tracing::warn!(queue = %queue, error = %error, "quarantined undecodable queue entry");

    #[cfg(feature = "metrics")]
    crate::metrics::record_entry_quarantined(queue);
}

pub fn record_enrichment_failed(repo: &str, field: &str, error: &str) {
    tracing::warn!(
        repo = %repo,
        field = %field,
        error = %error,
        "repository metadata lookup failed; dispatching with what is known"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_enrichment_failed(field);
}

/// Start timing a handler execution.
pub fn record_execution_start(job_id: impl Display) -> ExecutionTimer {
    ExecutionTimer {
        job_id: job_id.to_string(),
        start: Instant::now(),
    }
}

/// Log the outcome of a handler execution and observe its duration.
pub fn record_execution_end(timer: &ExecutionTimer, worker: &str, status: &str) -> Duration {
    let elapsed = timer.elapsed();
    tracing::info!(
        job_id = %timer.job_id,
        worker = %worker,
        status = %status,
        duration_secs = elapsed.as_secs_f64(),
        "instruction handled"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_execution_duration(worker, status, elapsed.as_secs_f64());

    elapsed
}

/// Wall-clock timer returned by [`record_execution_start`].
#[derive(Debug)]
pub struct ExecutionTimer {
    job_id: String,
    start: Instant,
}

impl ExecutionTimer {
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
