//! The control surface over runs and jobs.
//!
//! [`LifecycleController`] is what the CLI and any dashboard talk to. Every
//! mutating operation takes the run's lock from [`RunLocks`] for its whole
//! read-then-write sequence, so two control operations on one run never
//! interleave within a coordinator process. Operations on different runs are
//! independent.
//!
//! ```text
//! created --start--> running --(all jobs terminal, via collect_once)--> completed
//! running --cancel--> cancelled
//! completed/cancelled --reexecute_all--> running
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn, Instrument};

use crate::collect::{CollectOutcome, ResultCollector};
use crate::config::{BenchRepo, BenchmarkConfig};
use crate::dispatch::{CreateRun, DispatchOutcome, Dispatcher};
use crate::enrich::{NoopMetadataProvider, RepoMetadataProvider};
use crate::error::OrchestratorError;
use crate::events::{BenchEvent, BenchEventPayload, EventPublisher, InProcEventBus};
use crate::locks::RunLocks;
use crate::model::{format_ts, now_utc, JobId, JobRecord, JobStatus, RepoRef, RunId, RunMeta, RunStatus};
use crate::payload::JobInstruction;
use crate::store::{keys, records, SharedStore, WriteBatch};
use crate::summary::RunSummary;
use crate::telemetry;

/// Run lifecycle operations over a shared store.
pub struct LifecycleController<S: ?Sized> {
    store: Arc<S>,
    metadata: Arc<dyn RepoMetadataProvider>,
    events: Arc<dyn EventPublisher<BenchEvent>>,
    locks: RunLocks,
}

impl<S: ?Sized> Clone for LifecycleController<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            metadata: self.metadata.clone(),
            events: self.events.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<S: SharedStore + ?Sized> LifecycleController<S> {
    /// Controller with no metadata enrichment and an unobserved event bus.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            metadata: Arc::new(NoopMetadataProvider),
            events: Arc::new(InProcEventBus::default()),
            locks: RunLocks::new(),
        }
    }

    pub fn with_metadata_provider(mut self, metadata: Arc<dyn RepoMetadataProvider>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher<BenchEvent>>) -> Self {
        self.events = events;
        self
    }

    /// Share a lock registry with other controllers over the same store.
    pub fn with_locks(mut self, locks: RunLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn dispatcher(&self) -> Dispatcher<S> {
        Dispatcher::new(self.store.clone(), self.metadata.clone())
    }

    fn collector(&self) -> ResultCollector<S> {
        ResultCollector::new(self.store.clone())
    }

    async fn publish(&self, run_id: RunId, payload: BenchEventPayload) {
        if let Err(err) = self.events.publish(BenchEvent::new(run_id, payload)).await {
            warn!(run_id = %run_id, error = %err, "failed to publish run event");
        }
    }

    async fn publish_dispatch(&self, run_id: RunId, outcome: &DispatchOutcome, retry: bool) {
        for failure in &outcome.enrichment_failures {
            self.publish(
                run_id,
                BenchEventPayload::EnrichmentFailed {
                    repo: failure.repo.clone(),
                    field: failure.field.to_string(),
                    error: failure.error.clone(),
                },
            )
            .await;
        }
        if outcome.issued > 0 {
            self.publish(
                run_id,
                BenchEventPayload::JobsDispatched {
                    issued: outcome.issued,
                    retry,
                },
            )
            .await;
        }
    }

    /// Validate and persist a run in state `created`. Returns its id.
    pub async fn create(&self, request: CreateRun) -> Result<RunId, OrchestratorError> {
        let meta = self.dispatcher().create(request).await?;
        self.publish(
            meta.id,
            BenchEventPayload::RunCreated {
                name: meta.name.clone(),
                expected_jobs: meta.expected_jobs,
            },
        )
        .await;
        Ok(meta.id)
    }

    /// Dispatch every pair. Returns 0 without writing when the run is already running.
    pub async fn start(&self, run_id: RunId) -> Result<usize, OrchestratorError> {
        let _guard = self.locks.acquire(run_id).await;
        self.start_locked(run_id).await
    }

    async fn start_locked(&self, run_id: RunId) -> Result<usize, OrchestratorError> {
        let outcome = self.dispatcher().start(run_id).await?;
        self.publish_dispatch(run_id, &outcome, false).await;
        Ok(outcome.issued)
    }

    /// Issue new jobs for every pair whose current job did not complete.
    ///
    /// Completed pairs are never touched. The run goes back to `running`
    /// only when at least one job was issued.
    pub async fn retry_incomplete(&self, run_id: RunId) -> Result<usize, OrchestratorError> {
        let _guard = self.locks.acquire(run_id).await;
        let outcome = self.dispatcher().retry_incomplete(run_id).await?;
        self.publish_dispatch(run_id, &outcome, true).await;
        Ok(outcome.issued)
    }

    /// Reset the run's jobs and dispatch every pair afresh.
    pub async fn reexecute_all(&self, run_id: RunId) -> Result<usize, OrchestratorError> {
        let _guard = self.locks.acquire(run_id).await;
        self.reset_locked(run_id).await?;
        self.start_locked(run_id).await
    }

    /// Delete every job record and the pair index, returning the run to `created`.
    ///
    /// Instructions for those jobs still waiting in worker queues are removed
    /// as well. Returns the number of job records removed.
    pub async fn reset_jobs(&self, run_id: RunId) -> Result<usize, OrchestratorError> {
        let _guard = self.locks.acquire(run_id).await;
        self.reset_locked(run_id).await
    }

    async fn reset_locked(&self, run_id: RunId) -> Result<usize, OrchestratorError> {
        self.reset_inner(run_id)
            .instrument(telemetry::lifecycle_span("reset", run_id))
            .await
    }

    async fn reset_inner(&self, run_id: RunId) -> Result<usize, OrchestratorError> {
        let meta = records::load_meta(&*self.store, run_id).await?;
        let job_ids = records::job_ids(&*self.store, run_id).await?;
        let ids: HashSet<JobId> = job_ids.iter().copied().collect();

        let mut batch = WriteBatch::new();
        for (queue, raw) in self.queued_instructions(&meta.workers, &ids).await? {
            batch.lrem(queue, raw);
        }
        for job_id in &job_ids {
            batch.del(keys::job(run_id, *job_id));
        }
        batch
            .del(keys::run_jobs(run_id))
            .del(keys::job_index(run_id))
            .hset(
                keys::run(run_id),
                [
                    ("status", RunStatus::Created.to_string()),
                    ("reset_at", format_ts(&now_utc())),
                ],
            )
            .hdel(
                keys::run(run_id),
                ["started_at", "finished_at", "cancelled_at", "issued_jobs"],
            );
        self.store.apply(batch).await?;

        debug!(run_id = %run_id, removed = job_ids.len(), "run reset");
        self.publish(
            run_id,
            BenchEventPayload::RunReset {
                removed: job_ids.len(),
            },
        )
        .await;
        Ok(job_ids.len())
    }

    /// Cancel every pending job and mark the run `cancelled`.
    ///
    /// Instructions still queued for those jobs are removed; jobs a worker
    /// already dequeued keep running and their late results are dropped.
    /// Returns how many jobs were cancelled. A second call cancels nothing.
    pub async fn cancel(&self, run_id: RunId) -> Result<usize, OrchestratorError> {
        let _guard = self.locks.acquire(run_id).await;
        self.cancel_locked(run_id)
            .instrument(telemetry::cancel_span(run_id))
            .await
    }

    async fn cancel_locked(&self, run_id: RunId) -> Result<usize, OrchestratorError> {
        let meta = records::load_meta(&*self.store, run_id).await?;
        let pending: HashSet<JobId> = records::pending_job_ids(&*self.store, run_id)
            .await?
            .into_iter()
            .collect();
        // A completed run may still hold superseded `fired` jobs; they are
        // not part of the pair index and stay as they are.
        let settled = match meta.status {
            RunStatus::Completed => true,
            RunStatus::Cancelled => pending.is_empty(),
            RunStatus::Created | RunStatus::Running => false,
        };
        if settled {
            return Ok(0);
        }

        let mut batch = WriteBatch::new();
        let queued = self.queued_instructions(&meta.workers, &pending).await?;
        let dequeued = queued.len();
        for (queue, raw) in queued {
            batch.lrem(queue, raw);
        }

        let now = format_ts(&now_utc());
        for job_id in &pending {
            batch.hset(
                keys::job(run_id, *job_id),
                [
                    ("status", JobStatus::Cancelled.to_string()),
                    ("cancelled_at", now.clone()),
                ],
            );
        }
        batch.hset(
            keys::run(run_id),
            [
                ("status", RunStatus::Cancelled.to_string()),
                ("cancelled_at", now),
            ],
        );
        self.store.apply(batch).await?;

        telemetry::record_jobs_cancelled(run_id, pending.len(), dequeued);
        self.publish(
            run_id,
            BenchEventPayload::RunCancelled {
                cancelled: pending.len(),
            },
        )
        .await;
        Ok(pending.len())
    }

    /// Ingest available results and return `(done, total)`.
    pub async fn collect_once(&self, run_id: RunId) -> Result<(usize, usize), OrchestratorError> {
        let outcome = self.collect(run_id).await?;
        Ok((outcome.done, outcome.total))
    }

    /// Like [`collect_once`](Self::collect_once), reporting everything the pass did.
    pub async fn collect(&self, run_id: RunId) -> Result<CollectOutcome, OrchestratorError> {
        let _guard = self.locks.acquire(run_id).await;
        let outcome = self.collector().collect_once(run_id).await?;

        for (queue, error) in &outcome.quarantined {
            self.publish(
                run_id,
                BenchEventPayload::EntryQuarantined {
                    queue: queue.clone(),
                    error: error.clone(),
                },
            )
            .await;
        }
        for job in &outcome.collected {
            self.publish(
                run_id,
                BenchEventPayload::JobCollected {
                    job_id: job.job_id,
                    worker: job.worker.clone(),
                    status: job.status,
                },
            )
            .await;
        }
        if outcome.completed_run {
            self.publish(
                run_id,
                BenchEventPayload::RunCompleted {
                    done: outcome.done,
                    total: outcome.total,
                },
            )
            .await;
        }
        Ok(outcome)
    }

    /// Remove the run, its jobs and any instruction still queued for them.
    ///
    /// Returns the number of job records deleted.
    pub async fn delete_run(&self, run_id: RunId) -> Result<usize, OrchestratorError> {
        let guard = self.locks.acquire(run_id).await;
        let deleted = self
            .delete_locked(run_id)
            .instrument(telemetry::lifecycle_span("delete", run_id))
            .await?;
        drop(guard);

        self.publish(
            run_id,
            BenchEventPayload::RunDeleted {
                deleted_jobs: deleted,
            },
        )
        .await;
        Ok(deleted)
    }

    async fn delete_locked(&self, run_id: RunId) -> Result<usize, OrchestratorError> {
        let workers = match records::load_meta(&*self.store, run_id).await {
            Ok(meta) => meta.workers,
            Err(OrchestratorError::RunNotFound(_)) => {
                let leftovers = self.store.exists(&keys::run_jobs(run_id)).await?
                    || self.store.exists(&keys::run_repos(run_id)).await?;
                if !leftovers {
                    return Err(OrchestratorError::RunNotFound(run_id));
                }
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        let job_ids = records::job_ids(&*self.store, run_id).await?;
        let ids: HashSet<JobId> = job_ids.iter().copied().collect();

        let mut batch = WriteBatch::new();
        for (queue, raw) in self.queued_instructions(&workers, &ids).await? {
            batch.lrem(queue, raw);
        }
        for job_id in &job_ids {
            batch.del(keys::job(run_id, *job_id));
        }
        batch
            .del(keys::run_jobs(run_id))
            .del(keys::job_index(run_id))
            .del(keys::run_repos(run_id))
            .del(keys::run(run_id))
            .srem(keys::RUNS, run_id.to_string());
        self.store.apply(batch).await?;

        debug!(run_id = %run_id, deleted_jobs = job_ids.len(), "run deleted");
        Ok(job_ids.len())
    }

    /// Raw queue entries in `jobs:{worker}` whose job id is in `ids`.
    async fn queued_instructions(
        &self,
        workers: &[String],
        ids: &HashSet<JobId>,
    ) -> Result<Vec<(String, String)>, OrchestratorError> {
        let mut found = Vec::new();
        if ids.is_empty() {
            return Ok(found);
        }
        for worker in workers {
            let queue = keys::worker_jobs(worker);
            for raw in self.store.lrange(&queue).await? {
                // Undecodable entries are left for the worker to quarantine.
                if let Ok(instruction) = JobInstruction::decode(&raw) {
                    if ids.contains(&instruction.job_id) {
                        found.push((queue.clone(), raw));
                    }
                }
            }
        }
        Ok(found)
    }

    pub async fn get_meta(&self, run_id: RunId) -> Result<RunMeta, OrchestratorError> {
        records::load_meta(&*self.store, run_id).await
    }

    /// The run's repository snapshot.
    pub async fn get_repos(&self, run_id: RunId) -> Result<Vec<RepoRef>, OrchestratorError> {
        records::load_meta(&*self.store, run_id).await?;
        records::load_repos(&*self.store, run_id).await
    }

    /// Every job issued for the run, superseded ones included, in issue order.
    pub async fn list_jobs(&self, run_id: RunId) -> Result<Vec<JobRecord>, OrchestratorError> {
        records::load_meta(&*self.store, run_id).await?;
        records::load_jobs(&*self.store, run_id).await
    }

    pub async fn get_job(
        &self,
        run_id: RunId,
        job_id: JobId,
    ) -> Result<Option<JobRecord>, OrchestratorError> {
        records::load_job(&*self.store, run_id, job_id).await
    }

    /// The job currently indexed for a (repo, worker) pair.
    pub async fn current_job(
        &self,
        run_id: RunId,
        repo_full_name: &str,
        worker: &str,
    ) -> Result<Option<JobRecord>, OrchestratorError> {
        let pair = crate::model::pair_key(repo_full_name, worker);
        match self.store.hget(&keys::job_index(run_id), &pair).await? {
            Some(raw) => match raw.parse::<JobId>() {
                Ok(job_id) => records::load_job(&*self.store, run_id, job_id).await,
                Err(err) => Err(OrchestratorError::Malformed(format!("index entry {pair}: {err}"))),
            },
            None => Ok(None),
        }
    }

    /// Every known run, newest first.
    pub async fn list_runs(&self) -> Result<Vec<RunMeta>, OrchestratorError> {
        let mut runs = Vec::new();
        for raw in self.store.smembers(keys::RUNS).await? {
            let Ok(run_id) = raw.parse::<RunId>() else {
                warn!(member = %raw, "skipping malformed run id");
                continue;
            };
            match records::load_meta(&*self.store, run_id).await {
                Ok(meta) => runs.push(meta),
                Err(OrchestratorError::RunNotFound(_)) => {
                    debug!(run_id = %run_id, "run listed without metadata");
                }
                Err(err) => return Err(err),
            }
        }
        runs.sort_by(|a, b| b.listed_at().cmp(&a.listed_at()).then_with(|| b.id.cmp(&a.id)));
        Ok(runs)
    }

    /// Resolve a full run id or a unique prefix of one.
    pub async fn resolve_run(&self, id_or_prefix: &str) -> Result<RunId, OrchestratorError> {
        let needle = id_or_prefix.trim();
        if needle.is_empty() {
            return Err(OrchestratorError::UnknownRun(needle.to_string()));
        }
        if let Ok(run_id) = needle.parse::<RunId>() {
            if self.store.exists(&keys::run(run_id)).await? {
                return Ok(run_id);
            }
        }

        let needle = needle.to_ascii_lowercase();
        let mut matches: Vec<RunId> = self
            .store
            .smembers(keys::RUNS)
            .await?
            .into_iter()
            .filter(|member| member.starts_with(&needle))
            .filter_map(|member| member.parse().ok())
            .collect();
        match matches.len() {
            0 => Err(OrchestratorError::UnknownRun(id_or_prefix.trim().to_string())),
            1 => Ok(matches.remove(0)),
            count => Err(OrchestratorError::AmbiguousRun {
                prefix: id_or_prefix.trim().to_string(),
                count,
            }),
        }
    }

    /// Per-status counts over the run's current jobs.
    pub async fn summarize(&self, run_id: RunId) -> Result<RunSummary, OrchestratorError> {
        let meta = records::load_meta(&*self.store, run_id).await?;
        let index = records::pair_index(&*self.store, run_id).await?;
        let mut statuses = HashMap::with_capacity(index.len());
        for job_id in index.values() {
            statuses.insert(*job_id, records::job_status(&*self.store, run_id, *job_id).await?);
        }
        Ok(RunSummary::from_statuses(&meta, &index, &statuses))
    }

    /// Portable config that recreates the run.
    pub async fn export(&self, run_id: RunId) -> Result<BenchmarkConfig, OrchestratorError> {
        let meta = records::load_meta(&*self.store, run_id).await?;
        let repos = records::load_repos(&*self.store, run_id).await?;
        Ok(BenchmarkConfig {
            schema_version: "1".to_string(),
            name: meta.name,
            workers: meta.workers,
            repos: repos.iter().map(BenchRepo::from).collect(),
        })
    }
}
