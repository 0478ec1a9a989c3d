//! Benchmarks for control operations using criterion.
//!
//! These benchmarks measure, against the in-memory store:
//! - Create + start for growing repo×worker matrices
//! - A collection pass over a queue full of results
//! - Cancel of a fully pending run

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use cbom_bench::{InMemoryStore, LifecycleController};
use cbom_bench_testkit::{answer_all, create_request, workers};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

const MATRICES: [(usize, usize); 3] = [(10, 2), (50, 4), (200, 5)];

fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create tokio runtime")
}

fn controller() -> LifecycleController<InMemoryStore> {
    LifecycleController::new(Arc::new(InMemoryStore::new()))
}

/// Benchmark: create and start a run.
fn bench_create_start(c: &mut Criterion) {
    let rt = create_runtime();
    let mut group = c.benchmark_group("create_start");
    group.sample_size(30);
    group.measurement_time(Duration::from_secs(10));

    for (repos, worker_count) in MATRICES {
        group.throughput(Throughput::Elements((repos * worker_count) as u64));
        group.bench_with_input(
            BenchmarkId::new("in_memory", format!("{repos}x{worker_count}")),
            &(repos, worker_count),
            |b, &(repos, worker_count)| {
                b.to_async(&rt).iter(|| async move {
                    let controller = controller();
                    let run_id = controller
                        .create(create_request("bench", repos, worker_count))
                        .await
                        .expect("create should succeed");
                    controller.start(run_id).await.expect("start should succeed")
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: one collection pass that settles the whole run.
fn bench_collect(c: &mut Criterion) {
    let rt = create_runtime();
    let mut group = c.benchmark_group("collect_once");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(15));

    for (repos, worker_count) in MATRICES {
        group.throughput(Throughput::Elements((repos * worker_count) as u64));
        group.bench_with_input(
            BenchmarkId::new("in_memory", format!("{repos}x{worker_count}")),
            &(repos, worker_count),
            |b, &(repos, worker_count)| {
                b.to_async(&rt).iter_custom(|iters| async move {
                    let mut total = Duration::ZERO;
                    for _ in 0..iters {
                        let controller = controller();
                        let run_id = controller
                            .create(create_request("bench", repos, worker_count))
                            .await
                            .expect("create should succeed");
                        controller.start(run_id).await.expect("start should succeed");
                        for worker in workers(worker_count) {
                            answer_all(&**controller.store(), &worker, |_| "ok")
                                .await
                                .expect("answer should succeed");
                        }

                        let started = std::time::Instant::now();
                        let settled = controller.collect_once(run_id).await.expect("collect should succeed");
                        total += started.elapsed();
                        assert_eq!(settled.0, settled.1);
                    }
                    total
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: cancel a run with every job still queued.
fn bench_cancel(c: &mut Criterion) {
    let rt = create_runtime();
    let mut group = c.benchmark_group("cancel");
    group.sample_size(20);

    let (repos, worker_count) = MATRICES[1];
    group.bench_function("in_memory", |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                let controller = controller();
                let run_id = controller
                    .create(create_request("bench", repos, worker_count))
                    .await
                    .expect("create should succeed");
                controller.start(run_id).await.expect("start should succeed");

                let started = std::time::Instant::now();
                controller.cancel(run_id).await.expect("cancel should succeed");
                total += started.elapsed();
            }
            total
        });
    });

    group.finish();
}

criterion_group!(benches, bench_create_start, bench_collect, bench_cancel);
criterion_main!(benches);
