//! Wire records exchanged with workers through the shared store.
//!
//! Instructions travel on `jobs:{worker}`, results on `results:{worker}`.
//! Both are JSON documents; decoding happens once, at the store boundary,
//! and entries that fail to decode are quarantined by the caller.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::WorkerError;
use crate::model::{JobId, RepoRef};

/// Work order for one (repository, worker) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobInstruction {
    pub job_id: JobId,
    #[serde(alias = "tool")]
    pub worker: String,
    #[serde(alias = "repo_info")]
    pub repo: RepoRef,
}

impl JobInstruction {
    pub fn new(job_id: JobId, worker: impl Into<String>, repo: RepoRef) -> Self {
        Self {
            job_id,
            worker: worker.into(),
            repo,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Outcome reported by a worker.
///
/// Any value other than `ok` or `timeout` decodes as [`ResultStatus::Error`],
/// so the collector maps it to a failed job.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Timeout,
    #[default]
    Error,
}

impl ResultStatus {
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim() {
            "ok" => ResultStatus::Ok,
            "timeout" => ResultStatus::Timeout,
            _ => ResultStatus::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Ok => "ok",
            ResultStatus::Timeout => "timeout",
            ResultStatus::Error => "error",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ResultStatus::Ok)
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResultStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(ResultStatus::from_wire(&raw))
    }
}

/// Result pushed by a worker runtime once an instruction finished.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    #[serde(default)]
    pub status: ResultStatus,
    /// Normalized tool output (a JSON document serialized as a string).
    #[serde(default, alias = "json")]
    pub payload: String,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub duration_sec: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(default, alias = "repo_info", skip_serializing_if = "Option::is_none")]
    pub repo: Option<RepoRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn ok(
        instruction: &JobInstruction,
        worker: &str,
        payload: String,
        size_bytes: u64,
        duration: Duration,
    ) -> Self {
        Self {
            job_id: instruction.job_id,
            status: ResultStatus::Ok,
            size_bytes: Some(size_bytes),
            payload,
            duration_sec: duration.as_secs_f64(),
            worker: Some(worker.to_string()),
            repo: Some(instruction.repo.clone()),
            error: None,
        }
    }

    /// Failed result with an empty `{}` payload.
    pub fn failed(
        instruction: &JobInstruction,
        worker: &str,
        error: &WorkerError,
        duration: Duration,
    ) -> Self {
        let status = if error.is_timeout() {
            ResultStatus::Timeout
        } else {
            ResultStatus::Error
        };
        Self {
            job_id: instruction.job_id,
            status,
            payload: "{}".to_string(),
            duration_sec: duration.as_secs_f64(),
            size_bytes: Some(0),
            worker: Some(worker.to_string()),
            repo: Some(instruction.repo.clone()),
            error: Some(error.to_string()),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_default())
}

/// Canonicalize raw tool output into compact JSON.
///
/// Object keys come out sorted. Blank input yields `empty_json`, unparseable
/// input `invalid_json`.
pub fn normalize_json(raw: &str) -> Result<String, &'static str> {
    if raw.trim().is_empty() {
        return Err("empty_json");
    }
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|_| "invalid_json")?;
    serde_json::to_string(&value).map_err(|_| "invalid_json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_result_decodes() {
        let id = JobId::new();
        let raw = format!(r#"{{"job_id":"{id}","status":"ok","payload":"{{}}"}}"#);
        let result = JobResult::decode(&raw).unwrap();
        assert_eq!(result.job_id, id);
        assert!(result.status.is_ok());
        assert_eq!(result.payload, "{}");
        assert_eq!(result.duration_sec, 0.0);
    }

    #[test]
    fn test_null_optionals_decode() {
        let id = JobId::new();
        let raw = format!(
            r#"{{"job_id":"{id}","status":"ok","json":"{{}}","duration_sec":null,"size_bytes":null,"error":null}}"#
        );
        let result = JobResult::decode(&raw).unwrap();
        assert!(result.status.is_ok());
        assert_eq!(result.duration_sec, 0.0);
        assert_eq!(result.size_bytes, None);
        assert_eq!(result.error, None);
    }

    #[test]
    fn test_unknown_status_is_error() {
        let id = JobId::new();
        let raw = format!(r#"{{"job_id":"{id}","status":"exploded"}}"#);
        assert_eq!(JobResult::decode(&raw).unwrap().status, ResultStatus::Error);

        let raw = format!(r#"{{"job_id":"{id}"}}"#);
        assert_eq!(JobResult::decode(&raw).unwrap().status, ResultStatus::Error);
    }

    #[test]
    fn test_result_without_job_id_is_rejected() {
        assert!(JobResult::decode(r#"{"status":"ok"}"#).is_err());
        assert!(JobResult::decode("not json").is_err());
    }

    #[test]
    fn test_instruction_accepts_legacy_field_names() {
        let id = JobId::new();
        let raw = format!(
            r#"{{"job_id":"{id}","tool":"cdxgen","repo_info":{{"full_name":"a/b","git_url":"u","branch":"main"}}}}"#
        );
        let instruction = JobInstruction::decode(&raw).unwrap();
        assert_eq!(instruction.worker, "cdxgen");
        assert_eq!(instruction.repo.clone_url, "u");
    }

    #[test]
    fn test_normalize_json() {
        assert_eq!(normalize_json(""), Err("empty_json"));
        assert_eq!(normalize_json("  \n"), Err("empty_json"));
        assert_eq!(normalize_json("{oops"), Err("invalid_json"));
        assert_eq!(
            normalize_json("{ \"b\": 1,\n \"a\": [1, 2] }").unwrap(),
            r#"{"a":[1,2],"b":1}"#
        );
    }

    #[test]
    fn test_failed_result_carries_timeout_status() {
        let instruction = JobInstruction::new(JobId::new(), "w1", RepoRef::new("a/b"));
        let err = WorkerError::Timeout {
            limit: Duration::from_secs(1),
            elapsed: Duration::from_secs(1),
        };
        let result = JobResult::failed(&instruction, "w1", &err, Duration::from_secs(1));
        assert_eq!(result.status, ResultStatus::Timeout);
        assert_eq!(result.payload, "{}");
        assert!(result.error.unwrap().starts_with("timeout after"));
    }
}
