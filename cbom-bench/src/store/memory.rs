use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{SharedStore, StoreOp, WriteBatch};

/// Shared store kept entirely in process memory.
///
/// Cloning is cheap and every clone observes the same data, so a
/// coordinator and any number of worker runtimes can share one instance.
/// Empty hashes, lists and sets are dropped the way Redis drops them.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    pushed: Notify,
}

#[derive(Default)]
struct State {
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, BTreeSet<String>>,
    strings: HashMap<String, (String, Option<Instant>)>,
}

impl State {
    fn string(&mut self, key: &str) -> Option<String> {
        let expired = matches!(
            self.strings.get(key),
            Some((_, Some(deadline))) if *deadline <= Instant::now()
        );
        if expired {
            self.strings.remove(key);
            return None;
        }
        self.strings.get(key).map(|(value, _)| value.clone())
    }

    fn pop_front(&mut self, key: &str) -> Option<String> {
        let list = self.lists.get_mut(key)?;
        let value = list.pop_front();
        if list.is_empty() {
            self.lists.remove(key);
        }
        value
    }

    fn remove_first(&mut self, key: &str, value: &str) -> usize {
        let Some(list) = self.lists.get_mut(key) else {
            return 0;
        };
        let removed = match list.iter().position(|entry| entry == value) {
            Some(pos) => {
                list.remove(pos);
                1
            }
            None => 0,
        };
        if list.is_empty() {
            self.lists.remove(key);
        }
        removed
    }

    fn apply(&mut self, op: StoreOp) -> anyhow::Result<bool> {
        let mut pushed = false;
        match op {
            StoreOp::HSet { key, fields } => {
                self.hashes.entry(key).or_default().extend(fields);
            }
            StoreOp::HDel { key, fields } => {
                if let Some(hash) = self.hashes.get_mut(&key) {
                    for field in &fields {
                        hash.remove(field);
                    }
                    if hash.is_empty() {
                        self.hashes.remove(&key);
                    }
                }
            }
            StoreOp::RPush { key, value } => {
                self.lists.entry(key).or_default().push_back(value);
                pushed = true;
            }
            StoreOp::LSet { key, index, value } => {
                let slot = self
                    .lists
                    .get_mut(&key)
                    .and_then(|list| list.get_mut(index));
                match slot {
                    Some(slot) => *slot = value,
                    None => anyhow::bail!("lset {key}[{index}]: index out of range"),
                }
            }
            StoreOp::LRem { key, value } => {
                self.remove_first(&key, &value);
            }
            StoreOp::SAdd { key, member } => {
                self.sets.entry(key).or_default().insert(member);
            }
            StoreOp::SRem { key, member } => {
                if let Some(set) = self.sets.get_mut(&key) {
                    set.remove(&member);
                    if set.is_empty() {
                        self.sets.remove(&key);
                    }
                }
            }
            StoreOp::Del { key } => {
                self.hashes.remove(&key);
                self.lists.remove(&key);
                self.sets.remove(&key);
                self.strings.remove(&key);
            }
        }
        Ok(pushed)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every live key, sorted. Intended for assertions in tests.
    pub fn keys(&self) -> Vec<String> {
        let mut state = self.inner.state.lock();
        let strings: Vec<String> = state.strings.keys().cloned().collect();
        let mut keys: BTreeSet<String> = strings
            .into_iter()
            .filter(|key| state.string(key).is_some())
            .collect();
        keys.extend(state.hashes.keys().cloned());
        keys.extend(state.lists.keys().cloned());
        keys.extend(state.sets.keys().cloned());
        keys.into_iter().collect()
    }

    /// Length of a list, zero when absent.
    pub fn llen(&self, key: &str) -> usize {
        self.inner.state.lock().lists.get(key).map_or(0, VecDeque::len)
    }

    fn try_pop(&self, key: &str) -> Option<String> {
        self.inner.state.lock().pop_front(key)
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("InMemoryStore")
            .field("hashes", &state.hashes.len())
            .field("lists", &state.lists.len())
            .field("sets", &state.sets.len())
            .field("strings", &state.strings.len())
            .finish()
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn hgetall(&self, key: &str) -> anyhow::Result<HashMap<String, String>> {
        Ok(self
            .inner
            .state
            .lock()
            .hashes
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn hget(&self, key: &str, field: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .inner
            .state
            .lock()
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let mut state = self.inner.state.lock();
        Ok(state.hashes.contains_key(key)
            || state.lists.contains_key(key)
            || state.sets.contains_key(key)
            || state.string(key).is_some())
    }

    async fn lrange(&self, key: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .inner
            .state
            .lock()
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn lrem(&self, key: &str, value: &str) -> anyhow::Result<usize> {
        Ok(self.inner.state.lock().remove_first(key, value))
    }

    async fn rpush(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.inner
            .state
            .lock()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        self.inner.pushed.notify_waiters();
        Ok(())
    }

    async fn blpop(&self, key: &str, timeout: Option<Duration>) -> anyhow::Result<Option<String>> {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        loop {
            // Register interest before checking so a push between the
            // check and the await is not missed.
            let notified = self.inner.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop(key) {
                return Ok(Some(value));
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(self.try_pop(key));
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .inner
            .state
            .lock()
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.inner.state.lock().string(key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        self.inner.state.lock().strings.insert(
            key.to_string(),
            (value.to_string(), Some(Instant::now() + ttl)),
        );
        Ok(())
    }

    async fn apply(&self, batch: WriteBatch) -> anyhow::Result<()> {
        let mut first_error = None;
        let mut pushed = false;
        {
            let mut state = self.inner.state.lock();
            // Like EXEC, a failing command does not undo the others.
            for op in batch.into_ops() {
                match state.apply(op) {
                    Ok(did_push) => pushed |= did_push,
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }
        }
        if pushed {
            self.inner.pushed.notify_waiters();
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lrem_removes_single_match() {
        let store = InMemoryStore::new();
        for value in ["a", "b", "a"] {
            store.rpush("q", value).await.unwrap();
        }

        assert_eq!(store.lrem("q", "a").await.unwrap(), 1);
        assert_eq!(store.lrange("q").await.unwrap(), vec!["b", "a"]);
        assert_eq!(store.lrem("q", "zzz").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_containers_disappear() {
        let store = InMemoryStore::new();
        store.rpush("q", "x").await.unwrap();
        assert!(store.exists("q").await.unwrap());
        store.lrem("q", "x").await.unwrap();
        assert!(!store.exists("q").await.unwrap());

        let mut batch = WriteBatch::new();
        batch.hset("h", [("f", "v")]).hdel("h", ["f"]);
        store.apply(batch).await.unwrap();
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_blpop_waits_for_push() {
        let store = InMemoryStore::new();
        let consumer = store.clone();
        let handle = tokio::spawn(async move { consumer.blpop("q", None).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.rpush("q", "hello").await.unwrap();

        let popped = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("blpop should wake up")
            .unwrap()
            .unwrap();
        assert_eq!(popped.as_deref(), Some("hello"));
        assert_eq!(store.llen("q"), 0);
    }

    #[tokio::test]
    async fn test_blpop_times_out() {
        let store = InMemoryStore::new();
        let popped = store
            .blpop("q", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_batch_push_wakes_waiter() {
        let store = InMemoryStore::new();
        let consumer = store.clone();
        let handle = tokio::spawn(async move { consumer.blpop("jobs:w1", None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut batch = WriteBatch::new();
        batch.rpush("jobs:w1", "one").rpush("jobs:w1", "two");
        store.apply(batch).await.unwrap();

        let popped = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(popped.as_deref(), Some("one"));
        assert_eq!(store.lrange("jobs:w1").await.unwrap(), vec!["two"]);
    }

    #[tokio::test]
    async fn test_lset_out_of_range_keeps_other_writes() {
        let store = InMemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.lset("missing", 0, "x").sadd("runs", "r1");

        assert!(store.apply(batch).await.is_err());
        assert_eq!(store.smembers("runs").await.unwrap(), vec!["r1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_ex_expires() {
        let store = InMemoryStore::new();
        store
            .set_ex("gh:repo:a/b:meta", "{}", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.get("gh:repo:a/b:meta").await.unwrap().as_deref(), Some("{}"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get("gh:repo:a/b:meta").await.unwrap().is_none());
    }
}
