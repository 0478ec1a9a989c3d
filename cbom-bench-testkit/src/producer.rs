use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cbom_bench::{JobInstruction, Producer, RawOutput, Trace};
use parking_lot::Mutex;

/// What a [`ScriptedProducer`] does for one instruction.
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Return the body immediately.
    Respond(String),
    /// Sleep, then return the body.
    RespondAfter(Duration, String),
    /// Return an error with this message.
    Fail(String),
    /// Panic with this message.
    Panic(String),
}

/// Producer whose behavior is scripted per repository.
///
/// Repositories without an entry use the default behavior. Every instruction
/// is recorded before the behavior runs.
#[derive(Clone)]
pub struct ScriptedProducer {
    default: Behavior,
    per_repo: Arc<Mutex<HashMap<String, Behavior>>>,
    seen: Arc<Mutex<Vec<JobInstruction>>>,
}

impl ScriptedProducer {
    pub fn new(default: Behavior) -> Self {
        Self {
            default,
            per_repo: Arc::new(Mutex::new(HashMap::new())),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answers every instruction with a small CBOM naming the repository.
    pub fn echo() -> Self {
        Self::new(Behavior::Respond(String::new()))
    }

    pub fn with_repo(self, full_name: &str, behavior: Behavior) -> Self {
        self.per_repo.lock().insert(full_name.to_string(), behavior);
        self
    }

    pub fn seen(&self) -> Vec<JobInstruction> {
        self.seen.lock().clone()
    }

    pub fn assert_seen_count_eq(&self, expected: usize) {
        let seen = self.seen.lock().len();
        assert_eq!(seen, expected, "Expected {expected} instructions, got {seen}");
    }
}

fn body_for(body: &str, instruction: &JobInstruction) -> String {
    if body.is_empty() {
        serde_json::json!({
            "bomFormat": "CycloneDX",
            "metadata": { "component": { "name": instruction.repo.full_name } },
            "components": [],
        })
        .to_string()
    } else {
        body.to_string()
    }
}

#[async_trait]
impl Producer for ScriptedProducer {
    async fn produce(&self, instruction: &JobInstruction, trace: &mut Trace) -> anyhow::Result<RawOutput> {
        self.seen.lock().push(instruction.clone());
        let behavior = self
            .per_repo
            .lock()
            .get(&instruction.repo.full_name)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        match behavior {
            Behavior::Respond(body) => Ok(RawOutput::new(body_for(&body, instruction))),
            Behavior::RespondAfter(delay, body) => {
                tokio::time::sleep(delay).await;
                Ok(RawOutput::new(body_for(&body, instruction)))
            }
            Behavior::Fail(message) => {
                trace.add(format!("scripted failure for {}", instruction.repo.full_name));
                anyhow::bail!(message)
            }
            Behavior::Panic(message) => panic!("{message}"),
        }
    }
}
