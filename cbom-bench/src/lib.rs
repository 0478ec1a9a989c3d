//! cbom-bench - Run orchestration for benchmarking CBOM-generation tools.
//!
//! A benchmark run fans a fixed list of repositories out to a fixed list of
//! workers (one job per pair), tracks every job through a shared key-value
//! store that doubles as the message queue, and reconciles the results the
//! workers push back.
//!
//! # Core Concepts
//!
//! - **Run**: a named session over a repo×worker matrix, described by
//!   [`RunMeta`] and driven through the [`LifecycleController`].
//!
//! - **Job**: one (repository, worker) unit of work. The pair index maps each
//!   pair to its current [`JobId`]; retries supersede the entry rather than
//!   adding a second one.
//!
//! - **Store**: the [`SharedStore`] trait abstracts the backend. The
//!   [`InMemoryStore`] is always available; the Redis backend lives behind
//!   the `redis` feature.
//!
//! - **Worker runtime**: [`WorkerRuntime`] pops instructions for one worker,
//!   runs a [`Handler`] under a hard timeout and pushes a [`JobResult`]. Tool
//!   integrations implement [`Producer`] and get normalization for free.
//!
//! - **Events**: lifecycle transitions are published as [`BenchEvent`]s on an
//!   [`InProcEventBus`], including enrichment failures and quarantined queue
//!   entries.
//!
//! # Feature Flags
//!
//! - `redis` - Redis store backend and the `cbom-bench` binary
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cbom_bench::*;
//!
//! let controller = LifecycleController::new(Arc::new(InMemoryStore::new()));
//! let run_id = controller
//!     .create(CreateRun::new("nightly", vec![RepoRef::new("a/b")], vec!["cdxgen".into()]))
//!     .await?;
//! controller.start(run_id).await?;
//! let (done, total) = controller.collect_once(run_id).await?;
//! ```

/// Result collection from worker output queues.
///
/// The `collect` module provides [`ResultCollector`], which matches queued
/// results to pending jobs, drops stale ones and quarantines entries that
/// do not decode.
pub mod collect;

/// Configuration for the store, workers, GitHub access and benchmark files.
///
/// The `config` module defines [`StoreConfig`], [`GithubConfig`] and the
/// portable [`BenchmarkConfig`] file schema.
pub mod config;

/// Run creation and job dispatch.
///
/// The `dispatch` module provides [`CreateRun`] validation and the
/// [`Dispatcher`] that fans a run out to worker queues.
pub mod dispatch;

/// Best-effort repository metadata enrichment.
///
/// The `enrich` module defines the [`RepoMetadataProvider`] seam and the
/// default [`NoopMetadataProvider`].
pub mod enrich;

/// Error types for control operations and worker execution.
pub mod error;

/// Event publishing and subscription system.
///
/// The `events` module provides traits and types for run lifecycle events:
/// - [`EventPublisher`] and [`EventSubscriber`] for pub/sub patterns
/// - [`BenchEvent`] and [`BenchEventPayload`] for event data
/// - [`InProcEventBus`] for in-process event broadcasting
pub mod events;

/// GitHub-backed repository metadata with store-side caching.
pub mod github;

/// The control surface over runs and jobs.
///
/// The `lifecycle` module provides [`LifecycleController`]: create, start,
/// cancel, retry, re-execute, collect, delete and the read-only queries.
pub mod lifecycle;

/// Per-run serialization of control operations.
pub mod locks;

/// Prometheus metrics, available with the `metrics` feature.
#[cfg(feature = "metrics")]
pub mod metrics;

/// Core records: runs, jobs, repositories and their identifiers.
///
/// The `model` module defines [`RunId`], [`JobId`], [`RunStatus`],
/// [`JobStatus`], [`RepoRef`], [`RunMeta`] and [`JobRecord`] along with
/// their store field encodings.
pub mod model;

/// Wire payloads exchanged with workers.
///
/// The `payload` module defines [`JobInstruction`], [`JobResult`] and
/// [`normalize_json`].
pub mod payload;

#[cfg(feature = "redis")]
/// Redis persistence implementation.
///
/// The `persistence` module provides the Redis-backed [`SharedStore`]
/// implementation when the `redis` feature is enabled.
pub mod persistence;

/// Worker-side execution.
///
/// The `runtime` module provides the [`WorkerRuntime`] dequeue loop and its
/// seams. Includes:
/// - [`WorkerRuntime`] - pop, execute under timeout, push result
/// - [`WorkerConfig`] - per-worker configuration
/// - [`ShutdownToken`] - graceful shutdown signaling
/// - [`Handler`], [`Producer`] and [`ProducerHandler`] - tool integration seams
/// - [`CommandProducer`] - process-isolated producer
/// - [`WorkerRuntimeBuilder`] for constructing runtimes
pub mod runtime;

/// Shared store abstraction, key layout and the in-memory backend.
pub mod store;

/// Read-only per-status run summaries.
pub mod summary;

/// Tracing spans and structured log helpers.
pub mod telemetry;

pub use collect::*;
pub use config::*;
pub use dispatch::*;
pub use enrich::*;
pub use error::*;
pub use events::*;
pub use lifecycle::*;
pub use locks::*;
pub use model::*;
pub use payload::*;
pub use runtime::*;
pub use store::{InMemoryStore, SharedStore, StoreOp, WriteBatch};
pub use summary::*;

#[cfg(feature = "redis")]
pub use persistence::RedisStore;
