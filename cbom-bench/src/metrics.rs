//! Prometheus metrics instrumentation for cbom-bench.
//!
//! Conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `cbom_bench_jobs_dispatched_total` - Instructions pushed onto worker queues
//! - `cbom_bench_jobs_collected_total` - Worker results matched to jobs
//! - `cbom_bench_jobs_cancelled_total` - Pending jobs marked cancelled
//! - `cbom_bench_entries_quarantined_total` - Undecodable queue entries moved aside
//! - `cbom_bench_enrichment_failures_total` - Failed repository metadata lookups
//!
//! ## Histograms
//! - `cbom_bench_execution_duration_seconds` - Handler wall time per instruction
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, HistogramVec, IntCounter, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for cbom-bench metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `worker`.
pub static JOBS_DISPATCHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "cbom_bench_jobs_dispatched_total",
        "Total number of instructions pushed onto worker queues",
    );
    CounterVec::new(opts, &["worker"])
        .expect("cbom_bench_jobs_dispatched_total metric creation failed")
});

/// Labels: `worker`, `status` (completed, failed).
pub static JOBS_COLLECTED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "cbom_bench_jobs_collected_total",
        "Total number of worker results matched to jobs",
    );
    CounterVec::new(opts, &["worker", "status"])
        .expect("cbom_bench_jobs_collected_total metric creation failed")
});

pub static JOBS_CANCELLED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cbom_bench_jobs_cancelled_total",
        "Total number of pending jobs marked cancelled",
    )
    .expect("cbom_bench_jobs_cancelled_total metric creation failed")
});

/// Labels: `queue`.
pub static ENTRIES_QUARANTINED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "cbom_bench_entries_quarantined_total",
        "Total number of undecodable queue entries moved to quarantine",
    );
    CounterVec::new(opts, &["queue"])
        .expect("cbom_bench_entries_quarantined_total metric creation failed")
});

/// Labels: `field`.
pub static ENRICHMENT_FAILURES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "cbom_bench_enrichment_failures_total",
        "Total number of failed repository metadata lookups",
    );
    CounterVec::new(opts, &["field"])
        .expect("cbom_bench_enrichment_failures_total metric creation failed")
});

/// Labels: `worker`, `status` (ok, timeout, error).
pub static EXECUTION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.05, 2.0, 14).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "cbom_bench_execution_duration_seconds",
        "Handler wall time per instruction in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["worker", "status"])
        .expect("cbom_bench_execution_duration_seconds metric creation failed")
});

/// Register every metric with [`REGISTRY`]. Safe to call more than once.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_DISPATCHED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_COLLECTED_TOTAL.clone()),
        Box::new(JOBS_CANCELLED_TOTAL.clone()),
        Box::new(ENTRIES_QUARANTINED_TOTAL.clone()),
        Box::new(ENRICHMENT_FAILURES_TOTAL.clone()),
        Box::new(EXECUTION_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_jobs_dispatched(worker: &str, count: usize) {
    JOBS_DISPATCHED_TOTAL
        .with_label_values(&[worker])
        .inc_by(count as f64);
}

pub fn record_job_collected(worker: &str, status: &str) {
    JOBS_COLLECTED_TOTAL
        .with_label_values(&[worker, status])
        .inc();
}

pub fn record_jobs_cancelled(count: usize) {
    JOBS_CANCELLED_TOTAL.inc_by(count as u64);
}

pub fn record_entry_quarantined(queue: &str) {
    ENTRIES_QUARANTINED_TOTAL.with_label_values(&[queue]).inc();
}

pub fn record_enrichment_failed(field: &str) {
    ENRICHMENT_FAILURES_TOTAL.with_label_values(&[field]).inc();
}

pub fn observe_execution_duration(worker: &str, status: &str, duration_secs: f64) {
    EXECUTION_DURATION_SECONDS
        .with_label_values(&[worker, status])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
