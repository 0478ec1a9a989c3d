//! Glue between tool integrations and the worker runtime.
//!
//! A tool integration only implements [`Producer`]: given an instruction,
//! return the tool's raw output or an error. [`ProducerHandler`] turns that
//! into the [`Handler`] contract the runtime executes, canonicalizing the
//! payload and mapping failures onto [`WorkerError`].

use std::time::Duration;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::payload::{normalize_json, JobInstruction};

/// Diagnostic lines collected while producing output.
///
/// The rendered trace prefixes the error message when the job fails.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Trace {
    items: Vec<String>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line. Blank input is ignored.
    pub fn add(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref().trim();
        if !message.is_empty() {
            self.items.push(message.to_string());
        }
    }

    /// Append a failure with whatever output the failing step produced.
    pub fn add_error(
        &mut self,
        context: &str,
        error: impl std::fmt::Display,
        stdout: Option<&str>,
        stderr: Option<&str>,
    ) {
        let mut parts = vec![format!("{context}: {error}")];
        if let Some(stdout) = stdout.map(str::trim).filter(|s| !s.is_empty()) {
            parts.push(format!("stdout: {stdout}"));
        }
        if let Some(stderr) = stderr.map(str::trim).filter(|s| !s.is_empty()) {
            parts.push(format!("stderr: {stderr}"));
        }
        self.add(parts.join("\n"));
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn text(&self) -> Option<String> {
        (!self.items.is_empty()).then(|| self.items.join("\n"))
    }

    /// Trace text followed by `message`, skipping whichever is empty.
    fn prefix(&self, message: &str) -> String {
        match self.text() {
            Some(text) if message.is_empty() => text,
            Some(text) => format!("{text}\n{message}"),
            None => message.to_string(),
        }
    }
}

/// Raw tool output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawOutput {
    pub body: String,
    /// Duration measured by the tool itself; preferred over wall time.
    pub duration: Option<Duration>,
}

impl RawOutput {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// A tool integration: produce raw output for one instruction.
///
/// Returning a [`WorkerError`] inside the `anyhow::Error` (for instance
/// `WorkerError::Timeout` when the tool enforces its own deadline) keeps
/// that classification; any other error becomes `HandlerPanic`.
#[async_trait]
pub trait Producer: Send + Sync + 'static {
    async fn produce(&self, instruction: &JobInstruction, trace: &mut Trace) -> anyhow::Result<RawOutput>;
}

/// Successful handler output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerOutput {
    /// Canonical JSON document.
    pub payload: String,
    pub size_bytes: u64,
    pub duration: Option<Duration>,
}

/// What the runtime executes for every dequeued instruction.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, instruction: JobInstruction) -> Result<HandlerOutput, WorkerError>;
}

/// Adapts a [`Producer`] into a [`Handler`].
pub struct ProducerHandler<P> {
    producer: P,
    max_error_chars: usize,
}

impl<P: Producer> ProducerHandler<P> {
    pub fn new(producer: P) -> Self {
        Self {
            producer,
            max_error_chars: 4000,
        }
    }

    pub fn with_max_error_chars(mut self, max: usize) -> Self {
        self.max_error_chars = max;
        self
    }

    pub fn producer(&self) -> &P {
        &self.producer
    }
}

#[async_trait]
impl<P: Producer> Handler for ProducerHandler<P> {
    async fn handle(&self, instruction: JobInstruction) -> Result<HandlerOutput, WorkerError> {
        let mut trace = Trace::new();
        let raw = match self.producer.produce(&instruction, &mut trace).await {
            Ok(raw) => raw,
            Err(err) => {
                return Err(match err.downcast_ref::<WorkerError>() {
                    Some(WorkerError::Timeout { limit, elapsed }) => WorkerError::Timeout {
                        limit: *limit,
                        elapsed: *elapsed,
                    },
                    Some(WorkerError::NormalizationFailed { reason }) => WorkerError::NormalizationFailed {
                        reason: truncate(&trace.prefix(reason), self.max_error_chars),
                    },
                    _ => WorkerError::HandlerPanic {
                        message: truncate(&trace.prefix(&format!("{err:#}")), self.max_error_chars),
                    },
                });
            }
        };

        match normalize_json(&raw.body) {
            Ok(payload) => Ok(HandlerOutput {
                size_bytes: payload.len() as u64,
                payload,
                duration: raw.duration,
            }),
            Err(reason) => Err(WorkerError::NormalizationFailed {
                reason: truncate(&trace.prefix(reason), self.max_error_chars),
            }),
        }
    }
}

/// Keep the last `max` characters, where the root cause usually is.
pub fn truncate(message: &str, max: usize) -> String {
    let count = message.chars().count();
    if count <= max {
        return message.to_string();
    }
    let tail: String = message.chars().skip(count - max).collect();
    format!("…{tail}")
}
