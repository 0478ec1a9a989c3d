//! Stress tests for cbom-bench.
//!
//! Drives a 100×5 matrix through live workers while several collectors race
//! each other, then checks that every pair ends with exactly one terminal job.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use cbom_bench::store::keys;
use cbom_bench::{
    InMemoryStore, JobStatus, LifecycleController, ProducerHandler, RunStatus, SharedStore,
    WorkerConfig, WorkerRuntimeBuilder,
};
use cbom_bench_testkit::{create_request, workers, Behavior, ScriptedProducer};
use futures::future::join_all;
use tokio::time::timeout;

const REPOS: usize = 100;
const WORKERS: usize = 5;

fn spawn_workers(
    store: &Arc<InMemoryStore>,
    producer: &ScriptedProducer,
) -> Vec<(cbom_bench::ShutdownToken, tokio::task::JoinHandle<()>)> {
    workers(WORKERS)
        .into_iter()
        .map(|name| {
            let config = WorkerConfig::new(name)
                .with_timeout(Duration::from_secs(5))
                .with_result_pause(0)
                .with_poll_interval(5);
            let runtime = WorkerRuntimeBuilder::<InMemoryStore, ProducerHandler<ScriptedProducer>>::new(config)
                .with_store(Arc::clone(store))
                .with_producer(producer.clone())
                .build()
                .expect("runtime builds");
            let runtime = Arc::new(runtime);
            (runtime.shutdown_token(), runtime.spawn())
        })
        .collect()
}

async fn stop(workers: Vec<(cbom_bench::ShutdownToken, tokio::task::JoinHandle<()>)>) {
    for (token, _) in &workers {
        token.cancel();
    }
    for (_, handle) in workers {
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker stops")
            .unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_collectors_settle_every_pair_once() {
    let store = Arc::new(InMemoryStore::new());
    let controller = Arc::new(LifecycleController::new(Arc::clone(&store)));
    let run_id = controller
        .create(create_request("stress", REPOS, WORKERS))
        .await
        .unwrap();
    assert_eq!(controller.start(run_id).await.unwrap(), REPOS * WORKERS);

    let producer = ScriptedProducer::echo()
        .with_repo("org/repo-7", Behavior::Fail("scanner crashed".into()))
        .with_repo("org/repo-42", Behavior::Fail("scanner crashed".into()));
    let running = spawn_workers(&store, &producer);

    let collectors: Vec<_> = (0..4)
        .map(|_| {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                loop {
                    let (done, total) = controller.collect_once(run_id).await.unwrap();
                    if done >= total {
                        return (done, total);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        })
        .collect();

    let settled = timeout(Duration::from_secs(30), join_all(collectors))
        .await
        .expect("collectors finish");
    for result in settled {
        assert_eq!(result.unwrap(), (REPOS * WORKERS, REPOS * WORKERS));
    }
    stop(running).await;

    producer.assert_seen_count_eq(REPOS * WORKERS);
    let seen: HashSet<_> = producer.seen().into_iter().map(|i| i.job_id).collect();
    assert_eq!(seen.len(), REPOS * WORKERS, "an instruction ran twice");

    let summary = controller.summarize(run_id).await.unwrap();
    assert_eq!(summary.counts.failed, 2 * WORKERS);
    assert_eq!(summary.counts.completed, (REPOS - 2) * WORKERS);
    assert_eq!(summary.status, RunStatus::Completed);

    for worker in workers(WORKERS) {
        assert_eq!(store.llen(&keys::worker_jobs(&worker)), 0);
        assert_eq!(store.llen(&keys::worker_results(&worker)), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_races_live_workers() {
    let store = Arc::new(InMemoryStore::new());
    let controller = Arc::new(LifecycleController::new(Arc::clone(&store)));
    let run_id = controller
        .create(create_request("cancel-race", REPOS, WORKERS))
        .await
        .unwrap();
    controller.start(run_id).await.unwrap();

    let producer = ScriptedProducer::new(Behavior::RespondAfter(Duration::from_millis(2), String::new()));
    let running = spawn_workers(&store, &producer);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let collector = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            for _ in 0..20 {
                controller.collect_once(run_id).await.unwrap();
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    };
    let cancelled = controller.cancel(run_id).await.unwrap();
    collector.await.unwrap();
    stop(running).await;

    // Late results for cancelled jobs are dropped, never applied.
    let outcome = controller.collect(run_id).await.unwrap();
    assert!(outcome.collected.is_empty());

    let jobs = controller.list_jobs(run_id).await.unwrap();
    assert_eq!(jobs.len(), REPOS * WORKERS);
    let cancelled_now = jobs.iter().filter(|j| j.status == JobStatus::Cancelled).count();
    assert_eq!(cancelled_now, cancelled);
    assert!(jobs.iter().all(|j| j.status.is_terminal()));
    assert_eq!(controller.get_meta(run_id).await.unwrap().status, RunStatus::Cancelled);

    for worker in workers(WORKERS) {
        assert_eq!(store.llen(&keys::worker_jobs(&worker)), 0);
        assert!(store.lrange(&keys::worker_results(&worker)).await.unwrap().is_empty());
    }
}
