use std::time::Duration;

use cbom_bench::store::keys;
use cbom_bench::{JobId, JobInstruction, SharedStore};
use serde_json::json;

/// Push a raw result for `job_id` onto `results:{worker}`.
pub async fn push_result<S: SharedStore + ?Sized>(
    store: &S,
    worker: &str,
    job_id: JobId,
    status: &str,
    payload: &str,
) -> anyhow::Result<()> {
    let entry = json!({
        "job_id": job_id,
        "status": status,
        "payload": payload,
        "duration_sec": 0.5,
    });
    store.rpush(&keys::worker_results(worker), &entry.to_string()).await
}

/// Instructions currently waiting on `jobs:{worker}`, head first.
pub async fn queued_instructions<S: SharedStore + ?Sized>(
    store: &S,
    worker: &str,
) -> anyhow::Result<Vec<JobInstruction>> {
    store
        .lrange(&keys::worker_jobs(worker))
        .await?
        .iter()
        .map(|raw| Ok(JobInstruction::decode(raw)?))
        .collect()
}

/// Pop every queued instruction for `worker` and answer each one with the
/// status `answer` picks. Returns the answered instructions.
pub async fn answer_all<S, F>(store: &S, worker: &str, mut answer: F) -> anyhow::Result<Vec<JobInstruction>>
where
    S: SharedStore + ?Sized,
    F: FnMut(&JobInstruction) -> &'static str,
{
    let mut answered = Vec::new();
    let queue = keys::worker_jobs(worker);
    while let Some(raw) = store.blpop(&queue, Some(Duration::from_millis(1))).await? {
        let instruction = JobInstruction::decode(&raw)?;
        push_result(store, worker, instruction.job_id, answer(&instruction), "{}").await?;
        answered.push(instruction);
    }
    Ok(answered)
}
