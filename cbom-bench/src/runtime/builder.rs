use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::store::SharedStore;

use super::adapter::{Handler, Producer, ProducerHandler};
use super::supervisor::WorkerRuntime;
use super::worker::WorkerConfig;

/// Builder for constructing a [`WorkerRuntime`] with explicit dependencies.
///
/// # Example
///
/// ```ignore
/// use cbom_bench::runtime::{CommandProducer, WorkerConfig, WorkerRuntimeBuilder};
///
/// let runtime = WorkerRuntimeBuilder::new(WorkerConfig::from_env("cdxgen")?)
///     .with_store(store)
///     .with_producer(CommandProducer::new("cdxgen", ["-o", "/dev/stdout", "{repo}"]))
///     .build()?;
/// runtime.run_until_shutdown().await;
/// ```
pub struct WorkerRuntimeBuilder<S: ?Sized, H> {
    config: WorkerConfig,
    store: Option<Arc<S>>,
    handler: Option<Arc<H>>,
}

impl<S: ?Sized, H> fmt::Debug for WorkerRuntimeBuilder<S, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("WorkerRuntimeBuilder");
        debug.field("config", &self.config);
        debug.field("store_set", &self.store.is_some());
        debug.field("handler_set", &self.handler.is_some());
        if self.handler.is_some() {
            debug.field("handler_type", &type_name::<H>());
        }
        debug.finish()
    }
}

impl<S, H> WorkerRuntimeBuilder<S, H>
where
    S: SharedStore + ?Sized + 'static,
    H: Handler,
{
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            store: None,
            handler: None,
        }
    }

    pub fn with_store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_handler(mut self, handler: Arc<H>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// # Errors
    ///
    /// Returns an error if the store or handler is missing, or the worker
    /// name is blank.
    pub fn build(self) -> anyhow::Result<WorkerRuntime<S, H>> {
        if self.config.worker_name.trim().is_empty() {
            anyhow::bail!("worker name must not be empty");
        }
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store dependency missing"))?;
        let handler = self
            .handler
            .ok_or_else(|| anyhow::anyhow!("handler dependency missing"))?;
        Ok(WorkerRuntime::new(self.config, store, handler))
    }
}

impl<S, P> WorkerRuntimeBuilder<S, ProducerHandler<P>>
where
    S: SharedStore + ?Sized + 'static,
    P: Producer,
{
    /// Wrap a producer in the normalizing adapter, using the configured
    /// error truncation length.
    pub fn with_producer(self, producer: P) -> Self {
        let handler = ProducerHandler::new(producer).with_max_error_chars(self.config.max_error_chars);
        self.with_handler(Arc::new(handler))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::payload::JobInstruction;
    use crate::runtime::adapter::{RawOutput, Trace};
    use crate::store::InMemoryStore;

    struct Empty;

    #[async_trait]
    impl Producer for Empty {
        async fn produce(&self, _instruction: &JobInstruction, _trace: &mut Trace) -> anyhow::Result<RawOutput> {
            Ok(RawOutput::new("{}"))
        }
    }

    #[test]
    fn test_missing_dependencies() {
        let err = WorkerRuntimeBuilder::<InMemoryStore, ProducerHandler<Empty>>::new(WorkerConfig::new("w1"))
            .with_producer(Empty)
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "store dependency missing");

        let err = WorkerRuntimeBuilder::<InMemoryStore, ProducerHandler<Empty>>::new(WorkerConfig::new("w1"))
            .with_store(Arc::new(InMemoryStore::new()))
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "handler dependency missing");
    }

    #[test]
    fn test_blank_worker_name_rejected() {
        let err = WorkerRuntimeBuilder::<InMemoryStore, ProducerHandler<Empty>>::new(WorkerConfig::new("  "))
            .with_store(Arc::new(InMemoryStore::new()))
            .with_producer(Empty)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("worker name"));
    }

    #[test]
    fn test_build() {
        let runtime = WorkerRuntimeBuilder::new(WorkerConfig::new("w1"))
            .with_store(Arc::new(InMemoryStore::new()))
            .with_producer(Empty)
            .build()
            .unwrap();
        assert_eq!(runtime.worker_name(), "w1");
    }
}
