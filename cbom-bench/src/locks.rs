use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::model::RunId;

type Registry = Arc<Mutex<HashMap<RunId, Arc<AsyncMutex<()>>>>>;

/// Registry of per-run async locks.
///
/// Control operations on the same run hold the run's guard for their whole
/// read-then-write sequence, so a cancel cannot interleave with a collect or
/// a retry inside one coordinator process. Different runs never contend.
/// An entry lives only while some caller holds or waits for it.
#[derive(Clone, Default, Debug)]
pub struct RunLocks {
    inner: Registry,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `run_id`.
    pub async fn acquire(&self, run_id: RunId) -> RunGuard {
        let lock = {
            let mut guard = self.inner.lock();
            guard.entry(run_id).or_default().clone()
        };
        let held = Arc::clone(&lock).lock_owned().await;
        RunGuard {
            run_id,
            lock,
            held: Some(held),
            registry: Arc::clone(&self.inner),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Exclusive access to one run; releasing the last interest drops the entry.
#[derive(Debug)]
pub struct RunGuard {
    run_id: RunId,
    lock: Arc<AsyncMutex<()>>,
    held: Option<OwnedMutexGuard<()>>,
    registry: Registry,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.held.take();
        let mut registry = self.registry.lock();
        // Clones are only taken under the registry lock, so two references
        // (the map's and ours) means nobody else is waiting.
        let idle = registry
            .get(&self.run_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(&self.lock) == 2);
        if idle {
            registry.remove(&self.run_id);
        }
    }
}
