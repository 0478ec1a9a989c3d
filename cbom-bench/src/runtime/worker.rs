use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Configuration for one worker runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker name; selects `jobs:{name}` and `results:{name}`.
    pub worker_name: String,
    /// Hard wall-clock limit per instruction, in milliseconds.
    pub timeout_ms: u64,
    /// Pause after pushing each result, in milliseconds.
    pub result_pause_ms: u64,
    /// Error messages longer than this keep only their tail.
    pub max_error_chars: usize,
    /// Backoff after a store error in the dequeue loop, in milliseconds.
    pub store_backoff_ms: u64,
    /// Longest single blocking pop before the loop re-checks for shutdown.
    pub poll_interval_ms: u64,
}

impl WorkerConfig {
    /// Create a new worker configuration with the given worker name.
    pub fn new(worker_name: impl Into<String>) -> Self {
        Self {
            worker_name: worker_name.into(),
            timeout_ms: 60_000,
            result_pause_ms: 200,
            max_error_chars: 4000,
            store_backoff_ms: 1000,
            poll_interval_ms: 1000,
        }
    }

    /// Defaults, with the timeout taken from `WORKER_TIMEOUT_SEC` when set.
    pub fn from_env(worker_name: impl Into<String>) -> anyhow::Result<Self> {
        let config = Self::new(worker_name);
        match std::env::var("WORKER_TIMEOUT_SEC") {
            Ok(raw) if !raw.trim().is_empty() => {
                let secs = raw
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("WORKER_TIMEOUT_SEC must be whole seconds, got `{raw}`"))?;
                Ok(config.with_timeout_secs(secs))
            }
            _ => Ok(config),
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_ms = secs.saturating_mul(1000);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_result_pause(mut self, ms: u64) -> Self {
        self.result_pause_ms = ms;
        self
    }

    pub fn with_max_error_chars(mut self, max: usize) -> Self {
        self.max_error_chars = max;
        self
    }

    pub fn with_store_backoff(mut self, ms: u64) -> Self {
        self.store_backoff_ms = ms;
        self
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn result_pause(&self) -> Duration {
        Duration::from_millis(self.result_pause_ms)
    }

    pub fn store_backoff(&self) -> Duration {
        Duration::from_millis(self.store_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("default-worker")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::new("cdxgen");
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.result_pause(), Duration::from_millis(200));
        assert_eq!(config.max_error_chars, 4000);
    }

    #[test]
    fn test_sub_second_timeout() {
        let config = WorkerConfig::new("w").with_timeout(Duration::from_millis(250));
        assert_eq!(config.timeout(), Duration::from_millis(250));
    }
}
