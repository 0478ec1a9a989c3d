use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{JobId, JobStatus, RunId};

/// Metadata envelope attached to every run event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(run_id: RunId) -> Self {
        Self {
            version: 1,
            run_id,
            timestamp: Utc::now(),
        }
    }
}

/// Run lifecycle event with metadata and payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BenchEvent {
    pub meta: EventMeta,
    pub payload: BenchEventPayload,
}

impl BenchEvent {
    pub fn new(run_id: RunId, payload: BenchEventPayload) -> Self {
        Self {
            meta: EventMeta::new(run_id),
            payload,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.meta.run_id
    }
}

/// Event payload emitted for run and job transitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum BenchEventPayload {
    /// Run metadata and repo snapshot were written.
    RunCreated {
        name: String,
        expected_jobs: usize,
    },
    /// Instructions were pushed onto worker queues.
    JobsDispatched { issued: usize, retry: bool },
    /// A worker result was matched to a pending job.
    JobCollected {
        job_id: JobId,
        worker: String,
        status: JobStatus,
    },
    /// Every indexed job reached a terminal state.
    RunCompleted { done: usize, total: usize },
    RunCancelled { cancelled: usize },
    /// Job records and the pair index were cleared.
    RunReset { removed: usize },
    RunDeleted { deleted_jobs: usize },
    /// A best-effort metadata lookup failed; dispatch carried on.
    EnrichmentFailed {
        repo: String,
        field: String,
        error: String,
    },
    /// An undecodable queue entry was moved aside.
    EntryQuarantined { queue: String, error: String },
}

/// Generic event publisher trait for publishing events of type `E`.
#[async_trait]
pub trait EventPublisher<E>: Send + Sync
where
    E: Clone + Send + Sync + 'static,
{
    /// Publish an event to all subscribers.
    async fn publish(&self, event: E) -> anyhow::Result<()>;
}

/// Generic event subscriber trait for receiving events of type `E`.
pub trait EventSubscriber<E>: Send + Sync
where
    E: Clone + Send + Sync + 'static,
{
    /// Subscribe to events, returning a broadcast receiver.
    fn subscribe(&self) -> broadcast::Receiver<E>;
}

/// In-process event bus using a tokio broadcast channel.
///
/// Publishing never waits for slow subscribers: a subscriber that falls
/// more than `capacity` events behind receives `RecvError::Lagged`.
/// Events published with no subscriber attached are dropped.
#[derive(Clone)]
pub struct InProcEventBus {
    sender: broadcast::Sender<BenchEvent>,
    capacity: usize,
}

impl std::fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for InProcEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl InProcEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity: capacity.max(1),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn publish_event(&self, event: BenchEvent) {
        let _ = self.sender.send(event);
    }
}

#[async_trait]
impl EventPublisher<BenchEvent> for InProcEventBus {
    async fn publish(&self, event: BenchEvent) -> anyhow::Result<()> {
        self.publish_event(event);
        Ok(())
    }
}

impl EventSubscriber<BenchEvent> for InProcEventBus {
    fn subscribe(&self) -> broadcast::Receiver<BenchEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn dispatched(run_id: RunId, issued: usize) -> BenchEvent {
        BenchEvent::new(
            run_id,
            BenchEventPayload::JobsDispatched {
                issued,
                retry: false,
            },
        )
    }

    #[tokio::test]
    async fn test_event_bus_broadcast_to_multiple_subscribers() {
        let bus = InProcEventBus::new(100);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let run_id = RunId::new();

        for i in 0..5 {
            bus.publish(dispatched(run_id, i)).await.unwrap();
        }

        for i in 0..5 {
            let a = timeout(Duration::from_millis(100), rx1.recv())
                .await
                .unwrap()
                .unwrap();
            let b = timeout(Duration::from_millis(100), rx2.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(a.run_id(), run_id);
            assert!(matches!(
                b.payload,
                BenchEventPayload::JobsDispatched { issued, .. } if issued == i
            ));
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_doesnt_block_publisher() {
        let bus = InProcEventBus::new(2);
        let mut rx = bus.subscribe();
        let run_id = RunId::new();

        for i in 0..5 {
            bus.publish(dispatched(run_id, i)).await.unwrap();
        }

        let result = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(matches!(
            result,
            Ok(Err(broadcast::error::RecvError::Lagged(_)))
        ));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = InProcEventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(dispatched(RunId::new(), 1)).await.unwrap();

        let debug = format!("{bus:?}");
        assert!(debug.contains("capacity: 1024"));
    }
}
