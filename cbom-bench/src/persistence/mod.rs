/// Redis implementation of the shared store.
///
/// This module provides `RedisStore`, the backend used by the CLI and by
/// worker processes that coordinate through a real Redis server.
pub mod redis_store;

pub use redis_store::RedisStore;
