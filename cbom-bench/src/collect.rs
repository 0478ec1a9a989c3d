//! Result collection.
//!
//! Worker result queues are shared by every run, so collection scans each
//! `results:{worker}` list without popping and removes only the entries it
//! claims. An entry is claimed when its job id belongs to this run:
//! results for pending jobs are applied, results for jobs that are already
//! terminal are dropped, and entries that do not decode at all are moved to
//! the queue's quarantine list.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, Instrument};

use crate::error::OrchestratorError;
use crate::model::{format_ts, now_utc, JobId, JobStatus, RunId, RunStatus};
use crate::payload::JobResult;
use crate::store::{keys, records, SharedStore, WriteBatch};
use crate::telemetry;

/// One result applied to a job.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectedJob {
    pub job_id: JobId,
    pub worker: String,
    pub status: JobStatus,
}

/// What a collection pass did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollectOutcome {
    /// Indexed jobs in a terminal state after the pass.
    pub done: usize,
    /// Indexed jobs, one per dispatched pair.
    pub total: usize,
    pub collected: Vec<CollectedJob>,
    /// Results for this run's jobs that were already terminal.
    pub stale_dropped: usize,
    /// `(queue, error)` for every entry moved to quarantine.
    pub quarantined: Vec<(String, String)>,
    /// Whether this pass moved the run from `running` to `completed`.
    pub completed_run: bool,
}

/// Drains worker result queues into job records.
pub struct ResultCollector<S: ?Sized> {
    store: Arc<S>,
}

impl<S: SharedStore + ?Sized> ResultCollector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Apply every available result for the run and report `(done, total)`.
    ///
    /// Safe to call repeatedly: with no new results the counts do not change.
    pub async fn collect_once(&self, run_id: RunId) -> Result<CollectOutcome, OrchestratorError> {
        self.collect(run_id)
            .instrument(telemetry::collect_span(run_id))
            .await
    }

    async fn collect(&self, run_id: RunId) -> Result<CollectOutcome, OrchestratorError> {
        let meta = records::load_meta(&*self.store, run_id).await?;
        let mut statuses: HashMap<JobId, Option<JobStatus>> = records::job_statuses(&*self.store, run_id)
            .await?
            .into_iter()
            .collect();
        let mut pending: HashSet<JobId> = statuses
            .iter()
            .filter(|(_, status)| !status.is_some_and(|s| s.is_terminal()))
            .map(|(id, _)| *id)
            .collect();

        let mut outcome = CollectOutcome::default();
        let mut batch = WriteBatch::new();

        for worker in &meta.workers {
            let queue = keys::worker_results(worker);
            for raw in self.store.lrange(&queue).await? {
                let result = match JobResult::decode(&raw) {
                    Ok(result) => result,
                    Err(err) => {
                        telemetry::record_entry_quarantined(&queue, &err);
                        batch.lrem(&queue, raw.as_str()).rpush(keys::quarantine(&queue), raw.as_str());
                        outcome.quarantined.push((queue.clone(), err.to_string()));
                        continue;
                    }
                };

                if !statuses.contains_key(&result.job_id) {
                    // Another run's job.
                    continue;
                }
                batch.lrem(&queue, raw.as_str());
                if !pending.remove(&result.job_id) {
                    debug!(run_id = %run_id, job_id = %result.job_id, "dropping result for terminal job");
                    outcome.stale_dropped += 1;
                    continue;
                }

                let status = if result.status.is_ok() {
                    JobStatus::Completed
                } else {
                    JobStatus::Failed
                };
                batch.hset(
                    keys::job(run_id, result.job_id),
                    [
                        ("status", status.to_string()),
                        ("received_at", format_ts(&now_utc())),
                        ("result_json", result.encode()?),
                    ],
                );
                statuses.insert(result.job_id, Some(status));
                telemetry::record_job_collected(run_id, result.job_id, worker, status.as_str());
                outcome.collected.push(CollectedJob {
                    job_id: result.job_id,
                    worker: worker.clone(),
                    status,
                });
            }
        }

        let index = records::pair_index(&*self.store, run_id).await?;
        outcome.total = index.len();
        outcome.done = index
            .values()
            .filter(|id| statuses.get(id).copied().flatten().is_some_and(|s| s.is_terminal()))
            .count();

        if outcome.total > 0 && outcome.done == outcome.total && meta.status == RunStatus::Running {
            batch.hset(
                keys::run(run_id),
                [
                    ("status", RunStatus::Completed.to_string()),
                    ("finished_at", format_ts(&now_utc())),
                ],
            );
            outcome.completed_run = true;
        }

        if !batch.is_empty() {
            self.store.apply(batch).await?;
        }
        Ok(outcome)
    }
}
