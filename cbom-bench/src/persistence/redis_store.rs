use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::StoreConfig;
use crate::store::{SharedStore, StoreOp, WriteBatch};

/// Redis-backed implementation of the shared store.
///
/// Regular commands share one multiplexed [`ConnectionManager`]. Blocking
/// pops would stall that pipeline, so they go through a second manager
/// serialized behind a mutex. Batches are sent as `MULTI`/`EXEC`.
pub struct RedisStore {
    url: String,
    conn: ConnectionManager,
    blocking: Mutex<ConnectionManager>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").field("url", &self.url).finish()
    }
}

impl RedisStore {
    /// Connect both managers and verify the server answers.
    pub async fn connect(config: &StoreConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .with_context(|| format!("invalid redis url `{}`", config.url))?;
        let mut conn = ConnectionManager::new(client.clone())
            .await
            .with_context(|| format!("failed to connect to {}", config.url))?;
        let blocking = ConnectionManager::new(client)
            .await
            .with_context(|| format!("failed to open blocking connection to {}", config.url))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("redis PING failed")?;
        debug!(url = %config.url, "connected to redis");

        Ok(Self {
            url: config.url.clone(),
            conn,
            blocking: Mutex::new(blocking),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn pipeline(batch: WriteBatch) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch.into_ops() {
            match op {
                StoreOp::HSet { key, fields } => {
                    pipe.hset_multiple(key, &fields).ignore();
                }
                StoreOp::HDel { key, fields } => {
                    pipe.hdel(key, fields).ignore();
                }
                StoreOp::RPush { key, value } => {
                    pipe.rpush(key, value).ignore();
                }
                StoreOp::LSet { key, index, value } => {
                    pipe.lset(key, index as isize, value).ignore();
                }
                StoreOp::LRem { key, value } => {
                    pipe.lrem(key, 1, value).ignore();
                }
                StoreOp::SAdd { key, member } => {
                    pipe.sadd(key, member).ignore();
                }
                StoreOp::SRem { key, member } => {
                    pipe.srem(key, member).ignore();
                }
                StoreOp::Del { key } => {
                    pipe.del(key).ignore();
                }
            }
        }
        pipe
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn hgetall(&self, key: &str) -> anyhow::Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn hget(&self, key: &str, field: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn lrange(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(key, 0, -1).await?)
    }

    async fn lrem(&self, key: &str, value: &str) -> anyhow::Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.lrem(key, 1, value).await?)
    }

    async fn rpush(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: usize = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn blpop(&self, key: &str, timeout: Option<Duration>) -> anyhow::Result<Option<String>> {
        // Zero asks the server to wait forever.
        let secs = timeout.map_or(0.0, |t| t.as_secs_f64().max(0.001));
        let mut conn = self.blocking.lock().await;
        let popped: Option<(String, String)> = conn.blpop(key, secs).await?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = conn.pset_ex(key, value, millis).await?;
        Ok(())
    }

    async fn apply(&self, batch: WriteBatch) -> anyhow::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let ops = batch.len();
        let pipe = Self::pipeline(batch);
        let mut conn = self.conn.clone();
        let () = pipe
            .query_async(&mut conn)
            .await
            .with_context(|| format!("batch of {ops} writes failed"))?;
        Ok(())
    }
}
