use std::any::{type_name, Any};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::WorkerError;
use crate::payload::{JobInstruction, JobResult};
use crate::store::{keys, SharedStore, WriteBatch};
use crate::telemetry;

use super::adapter::Handler;
use super::worker::WorkerConfig;

/// Token for signaling graceful shutdown to a worker loop.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// What one iteration of the worker loop did.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// An instruction was executed and its result pushed.
    Handled(JobResult),
    /// An undecodable instruction was moved to the quarantine list.
    Quarantined,
    /// Nothing arrived within the poll interval.
    Idle,
    /// Shutdown was requested before anything was dequeued.
    Shutdown,
}

/// Long-lived loop that executes instructions for one worker.
///
/// Pops from `jobs:{worker}`, runs the handler on its own task under the
/// configured timeout and pushes the result onto `results:{worker}`. No
/// handler outcome stops the loop; store errors are logged and retried
/// after a backoff.
pub struct WorkerRuntime<S: ?Sized, H> {
    config: WorkerConfig,
    store: Arc<S>,
    handler: Arc<H>,
    shutdown_token: ShutdownToken,
}

impl<S: ?Sized, H> fmt::Debug for WorkerRuntime<S, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("config", &self.config)
            .field("store_type", &type_name::<S>())
            .field("handler_type", &type_name::<H>())
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl<S, H> WorkerRuntime<S, H>
where
    S: SharedStore + ?Sized + 'static,
    H: Handler,
{
    pub fn new(config: WorkerConfig, store: Arc<S>, handler: Arc<H>) -> Self {
        Self {
            config,
            store,
            handler,
            shutdown_token: ShutdownToken::new(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn worker_name(&self) -> &str {
        &self.config.worker_name
    }

    /// A handle that stops the loop when cancelled.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown_token.clone()
    }

    pub fn shutdown(&self) {
        tracing::info!(worker = %self.config.worker_name, "worker shutdown requested");
        self.shutdown_token.cancel();
    }

    /// Run the loop on a background task until shutdown.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_until_shutdown().await })
    }

    /// Process instructions until the shutdown token is cancelled.
    pub async fn run_until_shutdown(&self) {
        let worker = self.config.worker_name.as_str();
        tracing::info!(
            worker = %worker,
            timeout_secs = self.config.timeout().as_secs_f64(),
            "worker runtime started"
        );

        loop {
            match self.run_once().await {
                Ok(Step::Shutdown) => break,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(worker = %worker, error = %format!("{err:#}"), "worker store error; backing off");
                    tokio::select! {
                        _ = self.shutdown_token.cancelled() => break,
                        _ = tokio::time::sleep(self.config.store_backoff()) => {}
                    }
                }
            }
        }

        tracing::info!(worker = %worker, "worker runtime stopped");
    }

    /// Wait up to one poll interval for an instruction and process it.
    pub async fn run_once(&self) -> anyhow::Result<Step> {
        if self.shutdown_token.is_cancelled() {
            return Ok(Step::Shutdown);
        }

        let queue = keys::worker_jobs(&self.config.worker_name);
        match self.store.blpop(&queue, Some(self.config.poll_interval())).await? {
            Some(raw) => self.process(&raw).await,
            None if self.shutdown_token.is_cancelled() => Ok(Step::Shutdown),
            None => Ok(Step::Idle),
        }
    }

    /// Decode, execute and report one raw instruction entry.
    pub async fn process(&self, raw: &str) -> anyhow::Result<Step> {
        let worker = self.config.worker_name.as_str();
        let instruction = match JobInstruction::decode(raw) {
            Ok(instruction) => instruction,
            Err(err) => {
                let queue = keys::worker_jobs(worker);
                telemetry::record_entry_quarantined(&queue, &err);
                self.store.rpush(&keys::quarantine(&queue), raw).await?;
                return Ok(Step::Quarantined);
            }
        };

        if instruction.worker != worker {
            tracing::debug!(
                worker = %worker,
                addressed_to = %instruction.worker,
                job_id = %instruction.job_id,
                "instruction addressed to another worker name"
            );
        }

        let span = telemetry::execute_span(worker, instruction.job_id, &instruction.repo.full_name);
        let result = self.execute(instruction).instrument(span).await;

        let mut batch = WriteBatch::new();
        batch.rpush(keys::worker_results(worker), result.encode()?);
        self.store.apply(batch).await?;

        if !self.config.result_pause().is_zero() {
            tokio::time::sleep(self.config.result_pause()).await;
        }
        Ok(Step::Handled(result))
    }

    /// Run the handler under the configured timeout. Never fails.
    pub async fn execute(&self, instruction: JobInstruction) -> JobResult {
        let worker = self.config.worker_name.as_str();
        let limit = self.config.timeout();
        let timer = telemetry::record_execution_start(instruction.job_id);

        let handler = Arc::clone(&self.handler);
        let owned = instruction.clone();
        let mut task = tokio::spawn(async move { handler.handle(owned).await });

        let outcome = match tokio::time::timeout(limit, &mut task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) if join_err.is_panic() => Err(WorkerError::HandlerPanic {
                message: super::adapter::truncate(
                    &panic_message(join_err.into_panic()),
                    self.config.max_error_chars,
                ),
            }),
            Ok(Err(_)) => Err(WorkerError::HandlerPanic {
                message: "handler task was cancelled".to_string(),
            }),
            Err(_) => {
                // Aborting drops the handler future; a spawned child process is
                // killed with it when the producer sets kill_on_drop.
                task.abort();
                Err(WorkerError::Timeout {
                    limit,
                    elapsed: timer.elapsed(),
                })
            }
        };

        match outcome {
            Ok(output) => {
                let elapsed = telemetry::record_execution_end(&timer, worker, "ok");
                JobResult::ok(
                    &instruction,
                    worker,
                    output.payload,
                    output.size_bytes,
                    output.duration.unwrap_or(elapsed),
                )
            }
            Err(err) => {
                let status = if err.is_timeout() { "timeout" } else { "error" };
                let elapsed = telemetry::record_execution_end(&timer, worker, status);
                tracing::warn!(
                    worker = %worker,
                    job_id = %instruction.job_id,
                    repo = %instruction.repo.full_name,
                    status = status,
                    error = %err,
                    "instruction failed"
                );
                JobResult::failed(&instruction, worker, &err, elapsed)
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::model::{JobId, RepoRef};
    use crate::payload::ResultStatus;
    use crate::runtime::adapter::HandlerOutput;
    use crate::store::InMemoryStore;

    struct Sleepy(Duration);

    #[async_trait]
    impl Handler for Sleepy {
        async fn handle(&self, _instruction: JobInstruction) -> Result<HandlerOutput, WorkerError> {
            tokio::time::sleep(self.0).await;
            Ok(HandlerOutput {
                payload: "{}".into(),
                size_bytes: 2,
                duration: None,
            })
        }
    }

    struct Reporting;

    #[async_trait]
    impl Handler for Reporting {
        async fn handle(&self, _instruction: JobInstruction) -> Result<HandlerOutput, WorkerError> {
            Ok(HandlerOutput {
                payload: "{}".into(),
                size_bytes: 4096,
                duration: Some(Duration::from_secs(7)),
            })
        }
    }

    struct Panicky;

    #[async_trait]
    impl Handler for Panicky {
        async fn handle(&self, _instruction: JobInstruction) -> Result<HandlerOutput, WorkerError> {
            panic!("scanner blew up");
        }
    }

    fn runtime<H: Handler>(handler: H) -> WorkerRuntime<InMemoryStore, H> {
        let config = WorkerConfig::new("w1")
            .with_timeout(Duration::from_millis(100))
            .with_result_pause(0)
            .with_poll_interval(20);
        WorkerRuntime::new(config, Arc::new(InMemoryStore::new()), Arc::new(handler))
    }

    fn instruction() -> JobInstruction {
        JobInstruction::new(JobId::new(), "w1", RepoRef::new("a/b"))
    }

    #[tokio::test]
    async fn test_shutdown_token_wakes_waiter() {
        let token = ShutdownToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::task::yield_now().await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
        // Already cancelled returns immediately.
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_timeout_yields_timeout_result() {
        let runtime = runtime(Sleepy(Duration::from_secs(5)));
        let result = tokio::time::timeout(Duration::from_secs(1), runtime.execute(instruction()))
            .await
            .expect("execute is bounded by the worker timeout");
        assert_eq!(result.status, ResultStatus::Timeout);
        assert!(result.error.unwrap().starts_with("timeout after"));
        assert_eq!(result.payload, "{}");
    }

    #[tokio::test]
    async fn test_handler_size_and_duration_are_reported() {
        let runtime = runtime(Reporting);
        let result = runtime.execute(instruction()).await;
        assert_eq!(result.status, ResultStatus::Ok);
        assert_eq!(result.size_bytes, Some(4096));
        assert_eq!(result.duration_sec, 7.0);
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let runtime = runtime(Panicky);
        let result = runtime.execute(instruction()).await;
        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.error.as_deref(), Some("handler panicked: scanner blew up"));
    }

    #[tokio::test]
    async fn test_undecodable_instruction_is_quarantined() {
        let runtime = runtime(Sleepy(Duration::ZERO));
        assert_eq!(runtime.process("{not json").await.unwrap(), Step::Quarantined);
        assert_eq!(
            runtime.store.lrange("jobs:w1:quarantine").await.unwrap(),
            vec!["{not json".to_string()]
        );
        assert!(runtime.store.lrange("results:w1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idle_then_shutdown() {
        let runtime = runtime(Sleepy(Duration::ZERO));
        assert_eq!(runtime.run_once().await.unwrap(), Step::Idle);
        runtime.shutdown();
        assert_eq!(runtime.run_once().await.unwrap(), Step::Shutdown);
    }
}
