//! Run creation and instruction dispatch.
//!
//! A run is a cross product of repositories and workers. Dispatching mints
//! one job per pair, pushes its instruction onto `jobs:{worker}` and writes
//! the job record together with its pair index entry. All writes of one
//! dispatch pass go through a single [`WriteBatch`], so a crash leaves
//! either the previous state or a complete pass behind.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, Instrument};

use crate::enrich::{enrich_repo, EnrichmentFailure, RepoMetadataProvider};
use crate::error::OrchestratorError;
use crate::model::{format_ts, now_utc, pair_key, JobId, JobRecord, JobStatus, RepoRef, RunId, RunMeta, RunStatus};
use crate::payload::JobInstruction;
use crate::store::{keys, records, SharedStore, WriteBatch};
use crate::telemetry;

/// Request to create a run.
#[derive(Clone, Debug, PartialEq)]
pub struct CreateRun {
    pub name: String,
    pub params: serde_json::Value,
    pub repos: Vec<RepoRef>,
    pub workers: Vec<String>,
}

impl CreateRun {
    pub fn new(name: impl Into<String>, repos: Vec<RepoRef>, workers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            params: serde_json::Value::Object(Default::default()),
            repos,
            workers,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Normalize repos and workers, rejecting input that cannot form a run.
    ///
    /// Worker names are trimmed and de-duplicated in order. Repos must have
    /// distinct, non-empty slugs so every pair maps to one index entry.
    fn validate(self) -> Result<Self, OrchestratorError> {
        if self.repos.is_empty() {
            return Err(OrchestratorError::EmptyRepos);
        }

        let mut workers: Vec<String> = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let worker = worker.trim();
            if !worker.is_empty() && !workers.iter().any(|w| w == worker) {
                workers.push(worker.to_string());
            }
        }
        if workers.is_empty() {
            return Err(OrchestratorError::EmptyWorkers);
        }

        let mut seen = HashSet::with_capacity(self.repos.len());
        let mut repos = Vec::with_capacity(self.repos.len());
        for (position, repo) in self.repos.into_iter().enumerate() {
            let repo = repo.normalized();
            if repo.full_name.is_empty() {
                return Err(OrchestratorError::UnnamedRepo(position));
            }
            if !seen.insert(repo.full_name.clone()) {
                return Err(OrchestratorError::DuplicateRepo(repo.full_name));
            }
            repos.push(repo);
        }

        Ok(Self {
            name: self.name,
            params: self.params,
            repos,
            workers,
        })
    }
}

/// Which pairs a dispatch pass issues jobs for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchMode {
    /// Every pair gets a fresh job.
    All,
    /// Pairs whose indexed job completed are skipped.
    Incomplete,
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchMode::All => "all",
            DispatchMode::Incomplete => "incomplete",
        }
    }
}

/// What a dispatch pass did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DispatchOutcome {
    pub issued: usize,
    /// Issued count per worker, in run worker order.
    pub per_worker: Vec<(String, usize)>,
    pub enrichment_failures: Vec<EnrichmentFailure>,
}

/// Expands runs into jobs and writes instructions onto worker queues.
pub struct Dispatcher<S: ?Sized> {
    store: Arc<S>,
    metadata: Arc<dyn RepoMetadataProvider>,
}

impl<S: SharedStore + ?Sized> Dispatcher<S> {
    pub fn new(store: Arc<S>, metadata: Arc<dyn RepoMetadataProvider>) -> Self {
        Self { store, metadata }
    }

    /// Validate and persist a new run with status `created`.
    ///
    /// Nothing is written when validation fails. No network calls are made.
    pub async fn create(&self, request: CreateRun) -> Result<RunMeta, OrchestratorError> {
        let request = request.validate()?;
        let meta = RunMeta::new(
            RunId::new(),
            request.name,
            request.params,
            request.repos.len(),
            request.workers,
        );

        let mut batch = WriteBatch::new();
        batch
            .sadd(keys::RUNS, meta.id.to_string())
            .hset(keys::run(meta.id), meta.to_fields());
        for repo in &request.repos {
            batch.rpush(keys::run_repos(meta.id), serde_json::to_string(repo)?);
        }

        self.store
            .apply(batch)
            .instrument(telemetry::lifecycle_span("create", meta.id))
            .await?;
        debug!(run_id = %meta.id, expected_jobs = meta.expected_jobs, "run created");
        Ok(meta)
    }

    /// Dispatch every pair unless the run is already running.
    pub async fn start(&self, run_id: RunId) -> Result<DispatchOutcome, OrchestratorError> {
        let meta = records::load_meta(&*self.store, run_id).await?;
        if meta.status == RunStatus::Running {
            debug!(run_id = %run_id, "run already running; start is a no-op");
            return Ok(DispatchOutcome::default());
        }
        self.dispatch(&meta, DispatchMode::All)
            .instrument(telemetry::dispatch_span(run_id, DispatchMode::All.as_str()))
            .await
    }

    /// Supersede every pair whose indexed job did not complete.
    pub async fn retry_incomplete(&self, run_id: RunId) -> Result<DispatchOutcome, OrchestratorError> {
        let meta = records::load_meta(&*self.store, run_id).await?;
        self.dispatch(&meta, DispatchMode::Incomplete)
            .instrument(telemetry::retry_span(run_id))
            .await
    }

    async fn dispatch(
        &self,
        meta: &RunMeta,
        mode: DispatchMode,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        let run_id = meta.id;
        let repos = records::load_repos(&*self.store, run_id).await?;
        let index = match mode {
            DispatchMode::All => Default::default(),
            DispatchMode::Incomplete => records::pair_index(&*self.store, run_id).await?,
        };

        let mut outcome = DispatchOutcome {
            per_worker: meta.workers.iter().map(|w| (w.clone(), 0)).collect(),
            ..Default::default()
        };
        let mut batch = WriteBatch::new();

        for (position, mut repo) in repos.into_iter().enumerate() {
            if repo.needs_enrichment() {
                let failures = enrich_repo(self.metadata.as_ref(), &mut repo).await;
                for failure in &failures {
                    telemetry::record_enrichment_failed(&failure.repo, failure.field, &failure.error);
                }
                outcome.enrichment_failures.extend(failures);
            }
            if repo.branch.is_none() {
                repo.branch = Some(repo.effective_branch().to_string());
            }
            batch.lset(keys::run_repos(run_id), position, serde_json::to_string(&repo)?);

            for (slot, worker) in meta.workers.iter().enumerate() {
                let pair = pair_key(&repo.full_name, worker);
                if mode == DispatchMode::Incomplete {
                    if let Some(prior) = index.get(&pair) {
                        let status = records::job_status(&*self.store, run_id, *prior).await?;
                        if status == Some(JobStatus::Completed) {
                            continue;
                        }
                    }
                }

                let job = JobRecord::fired(JobId::new(), run_id, &repo.full_name, worker);
                let instruction = JobInstruction::new(job.id, worker.clone(), repo.clone());
                batch
                    .rpush(keys::worker_jobs(worker), instruction.encode()?)
                    .rpush(keys::run_jobs(run_id), job.id.to_string())
                    .hset(keys::job_index(run_id), [(pair, job.id.to_string())])
                    .hset(keys::job(run_id, job.id), job.to_fields());

                outcome.per_worker[slot].1 += 1;
                outcome.issued += 1;
            }
        }

        if mode == DispatchMode::All || outcome.issued > 0 {
            batch
                .hset(
                    keys::run(run_id),
                    [
                        ("status", RunStatus::Running.to_string()),
                        ("started_at", format_ts(&now_utc())),
                        ("issued_jobs", outcome.issued.to_string()),
                    ],
                )
                .hdel(keys::run(run_id), ["finished_at"]);
        }

        self.store.apply(batch).await?;

        for (worker, count) in &outcome.per_worker {
            if *count > 0 {
                telemetry::record_jobs_dispatched(run_id, worker, *count);
            }
        }
        Ok(outcome)
    }
}
