use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Key layout shared by the coordinator and the workers.
pub mod keys;
/// In-process store with the same semantics as the Redis backend.
pub mod memory;
/// Typed accessors for run and job records.
pub mod records;

pub use memory::InMemoryStore;

/// Key-value store used both as persistent state and as the message queue.
///
/// Implementors provide hashes, ordered lists, sets, TTL'd strings and a
/// blocking list pop. Mutations belonging to one logical operation go
/// through [`SharedStore::apply`] so they land together.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// All fields of a hash; empty when the key does not exist.
    async fn hgetall(&self, key: &str) -> anyhow::Result<HashMap<String, String>>;

    /// A single hash field.
    async fn hget(&self, key: &str, field: &str) -> anyhow::Result<Option<String>>;

    /// Whether any value is stored under `key`.
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;

    /// Every element of a list, head first.
    async fn lrange(&self, key: &str) -> anyhow::Result<Vec<String>>;

    /// Remove the first element equal to `value`; returns how many were removed.
    async fn lrem(&self, key: &str, value: &str) -> anyhow::Result<usize>;

    /// Append to the tail of a list.
    async fn rpush(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Pop the head of a list, waiting up to `timeout` (forever when `None`).
    async fn blpop(&self, key: &str, timeout: Option<Duration>) -> anyhow::Result<Option<String>>;

    /// Members of a set, in no particular order.
    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>>;

    /// A plain string value.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Store a string value that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;

    /// Apply a batch of writes as one unit.
    async fn apply(&self, batch: WriteBatch) -> anyhow::Result<()>;
}

/// A single buffered mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StoreOp {
    HSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    HDel {
        key: String,
        fields: Vec<String>,
    },
    RPush {
        key: String,
        value: String,
    },
    LSet {
        key: String,
        index: usize,
        value: String,
    },
    LRem {
        key: String,
        value: String,
    },
    SAdd {
        key: String,
        member: String,
    },
    SRem {
        key: String,
        member: String,
    },
    Del {
        key: String,
    },
}

/// Ordered group of writes applied atomically by [`SharedStore::apply`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<StoreOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hset<K, V>(&mut self, key: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let fields: Vec<(String, String)> = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if !fields.is_empty() {
            self.ops.push(StoreOp::HSet {
                key: key.into(),
                fields,
            });
        }
        self
    }

    pub fn hdel<F: Into<String>>(&mut self, key: impl Into<String>, fields: impl IntoIterator<Item = F>) -> &mut Self {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if !fields.is_empty() {
            self.ops.push(StoreOp::HDel {
                key: key.into(),
                fields,
            });
        }
        self
    }

    pub fn rpush(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(StoreOp::RPush {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn lset(&mut self, key: impl Into<String>, index: usize, value: impl Into<String>) -> &mut Self {
        self.ops.push(StoreOp::LSet {
            key: key.into(),
            index,
            value: value.into(),
        });
        self
    }

    pub fn lrem(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(StoreOp::LRem {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(StoreOp::SAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn srem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(StoreOp::SRem {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(StoreOp::Del { key: key.into() });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<StoreOp> {
        self.ops
    }
}
