use std::collections::HashMap;

use tracing::warn;

use super::{keys, SharedStore};
use crate::error::OrchestratorError;
use crate::model::{JobId, JobRecord, JobStatus, RepoRef, RunId, RunMeta};

/// Run metadata; [`OrchestratorError::RunNotFound`] when the hash is absent.
pub async fn load_meta<S>(store: &S, run_id: RunId) -> Result<RunMeta, OrchestratorError>
where
    S: SharedStore + ?Sized,
{
    let fields = store.hgetall(&keys::run(run_id)).await?;
    if fields.is_empty() {
        return Err(OrchestratorError::RunNotFound(run_id));
    }
    Ok(RunMeta::from_fields(run_id, &fields)?)
}

/// Repository snapshot in creation order.
pub async fn load_repos<S>(store: &S, run_id: RunId) -> Result<Vec<RepoRef>, OrchestratorError>
where
    S: SharedStore + ?Sized,
{
    store
        .lrange(&keys::run_repos(run_id))
        .await?
        .iter()
        .map(|raw| {
            serde_json::from_str::<RepoRef>(raw)
                .map(RepoRef::normalized)
                .map_err(OrchestratorError::from)
        })
        .collect()
}

/// Every job id ever issued for the run, superseded ones included.
pub async fn job_ids<S>(store: &S, run_id: RunId) -> Result<Vec<JobId>, OrchestratorError>
where
    S: SharedStore + ?Sized,
{
    let raw_ids = store.lrange(&keys::run_jobs(run_id)).await?;
    let mut ids = Vec::with_capacity(raw_ids.len());
    for raw in raw_ids {
        match raw.parse::<JobId>() {
            Ok(id) => ids.push(id),
            Err(err) => warn!(run_id = %run_id, raw = %raw, error = %err, "skipping malformed job id"),
        }
    }
    Ok(ids)
}

/// Stored status of one job; `None` when the record is missing or unreadable.
pub async fn job_status<S>(
    store: &S,
    run_id: RunId,
    job_id: JobId,
) -> Result<Option<JobStatus>, OrchestratorError>
where
    S: SharedStore + ?Sized,
{
    let raw = store.hget(&keys::job(run_id, job_id), "status").await?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

/// Status of every listed job, in list order.
pub async fn job_statuses<S>(
    store: &S,
    run_id: RunId,
) -> Result<Vec<(JobId, Option<JobStatus>)>, OrchestratorError>
where
    S: SharedStore + ?Sized,
{
    let ids = job_ids(store, run_id).await?;
    let mut statuses = Vec::with_capacity(ids.len());
    for id in ids {
        statuses.push((id, job_status(store, run_id, id).await?));
    }
    Ok(statuses)
}

/// Ids of listed jobs that have not reached a terminal state.
pub async fn pending_job_ids<S>(store: &S, run_id: RunId) -> Result<Vec<JobId>, OrchestratorError>
where
    S: SharedStore + ?Sized,
{
    Ok(job_statuses(store, run_id)
        .await?
        .into_iter()
        .filter(|(_, status)| !status.is_some_and(|s| s.is_terminal()))
        .map(|(id, _)| id)
        .collect())
}

/// Pair index: `"{repo}|{worker}"` to the currently active job id.
pub async fn pair_index<S>(
    store: &S,
    run_id: RunId,
) -> Result<HashMap<String, JobId>, OrchestratorError>
where
    S: SharedStore + ?Sized,
{
    let raw = store.hgetall(&keys::job_index(run_id)).await?;
    let mut index = HashMap::with_capacity(raw.len());
    for (pair, id) in raw {
        match id.parse::<JobId>() {
            Ok(id) => {
                index.insert(pair, id);
            }
            Err(err) => warn!(run_id = %run_id, pair = %pair, error = %err, "skipping malformed index entry"),
        }
    }
    Ok(index)
}

pub async fn load_job<S>(
    store: &S,
    run_id: RunId,
    job_id: JobId,
) -> Result<Option<JobRecord>, OrchestratorError>
where
    S: SharedStore + ?Sized,
{
    let fields = store.hgetall(&keys::job(run_id, job_id)).await?;
    if fields.is_empty() {
        return Ok(None);
    }
    JobRecord::from_fields(job_id, run_id, &fields).map(Some)
}

/// Every job record still present for the run, in issue order.
pub async fn load_jobs<S>(store: &S, run_id: RunId) -> Result<Vec<JobRecord>, OrchestratorError>
where
    S: SharedStore + ?Sized,
{
    let mut jobs = Vec::new();
    for id in job_ids(store, run_id).await? {
        if let Some(job) = load_job(store, run_id, id).await? {
            jobs.push(job);
        }
    }
    Ok(jobs)
}
