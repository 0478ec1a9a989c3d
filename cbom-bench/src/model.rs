use std::collections::HashMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of a benchmark run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// First eight characters, used by compact listings.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Opaque identifier of one dispatched (repository, worker) job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Aggregate lifecycle of a run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Created,
    Running,
    Completed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(RunStatus::Created),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Lifecycle of a single job. A pair without a job is logically pending.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Fired,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Fired => "fired",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states are sticky for a given job id.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Fired)
    }

    /// Whether a stored status string denotes a terminal job.
    ///
    /// Unknown or missing values count as pending.
    pub fn is_terminal_str(raw: Option<&str>) -> bool {
        raw.and_then(|s| s.parse::<JobStatus>().ok())
            .is_some_and(|status| status.is_terminal())
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fired" => Ok(JobStatus::Fired),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown status `{0}`")]
pub struct UnknownStatus(pub String);

/// Repository snapshot taken when a run is created.
///
/// Accepts the field spellings used by GitHub search results
/// (`git_url`, `default_branch`, `stargazers_count`, `size`) on input, and
/// tolerates both spellings of a field side by side.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawRepoRef")]
pub struct RepoRef {
    pub full_name: String,
    pub clone_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stars: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_kb: Option<u64>,
}

/// Every accepted spelling as its own field; [`RepoRef`] picks one per slot.
#[derive(Deserialize)]
struct RawRepoRef {
    full_name: String,
    #[serde(default)]
    clone_url: Option<String>,
    #[serde(default)]
    git_url: Option<String>,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    main_language: Option<String>,
    #[serde(default)]
    stars: Option<u64>,
    #[serde(default)]
    stargazers_count: Option<u64>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    size_kb: Option<u64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<RawRepoRef> for RepoRef {
    fn from(raw: RawRepoRef) -> Self {
        Self {
            full_name: raw.full_name,
            clone_url: non_empty(raw.clone_url)
                .or_else(|| non_empty(raw.git_url))
                .unwrap_or_default(),
            branch: non_empty(raw.default_branch).or_else(|| non_empty(raw.branch)),
            language: non_empty(raw.language).or_else(|| non_empty(raw.main_language)),
            stars: raw.stars.or(raw.stargazers_count),
            size_kb: raw.size.or(raw.size_kb),
        }
    }
}

impl RepoRef {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            ..Default::default()
        }
        .normalized()
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_clone_url(mut self, url: impl Into<String>) -> Self {
        self.clone_url = url.into();
        self
    }

    /// Trim the slug and derive a GitHub clone URL when none was given.
    pub fn normalized(mut self) -> Self {
        self.full_name = self.full_name.trim().to_string();
        if self.clone_url.trim().is_empty() && !self.full_name.is_empty() {
            self.clone_url = format!("https://github.com/{}.git", self.full_name);
        }
        if self.branch.as_deref().is_some_and(|b| b.trim().is_empty()) {
            self.branch = None;
        }
        self
    }

    /// Branch handed to workers; `main` when nothing better is known.
    pub fn effective_branch(&self) -> &str {
        self.branch.as_deref().unwrap_or("main")
    }

    /// Whether any best-effort metadata is still missing.
    pub fn needs_enrichment(&self) -> bool {
        self.branch.is_none()
            || self.language.is_none()
            || self.stars.is_none()
            || self.size_kb.is_none()
    }
}

/// Join key for the pair index.
pub fn pair_key(repo_full_name: &str, worker: &str) -> String {
    format!("{repo_full_name}|{worker}")
}

/// Current UTC time with second precision, as stored in records.
pub fn now_utc() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

/// ISO-8601 with a `Z` suffix and no fractional seconds.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Run metadata as persisted in the `run:{id}` hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub id: RunId,
    pub name: String,
    pub status: RunStatus,
    pub params: serde_json::Value,
    pub workers: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub reset_at: Option<DateTime<Utc>>,
    pub repo_count: usize,
    pub worker_count: usize,
    pub expected_jobs: usize,
    pub issued_jobs: Option<usize>,
}

impl RunMeta {
    pub fn new(
        id: RunId,
        name: impl Into<String>,
        params: serde_json::Value,
        repo_count: usize,
        workers: Vec<String>,
    ) -> Self {
        let worker_count = workers.len();
        Self {
            id,
            name: name.into(),
            status: RunStatus::Created,
            params,
            workers,
            created_at: now_utc(),
            started_at: None,
            finished_at: None,
            cancelled_at: None,
            reset_at: None,
            repo_count,
            worker_count,
            expected_jobs: repo_count * worker_count,
            issued_jobs: None,
        }
    }

    /// Hash fields written at creation time.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("name".to_string(), self.name.clone()),
            ("status".to_string(), self.status.to_string()),
            ("params_json".to_string(), self.params.to_string()),
            (
                "workers_json".to_string(),
                serde_json::Value::from(self.workers.clone()).to_string(),
            ),
            ("created_at".to_string(), format_ts(&self.created_at)),
            ("repo_count".to_string(), self.repo_count.to_string()),
            ("worker_count".to_string(), self.worker_count.to_string()),
            ("expected_jobs".to_string(), self.expected_jobs.to_string()),
        ];
        let optional = [
            ("started_at", self.started_at),
            ("finished_at", self.finished_at),
            ("cancelled_at", self.cancelled_at),
            ("reset_at", self.reset_at),
        ];
        for (name, ts) in optional {
            if let Some(ts) = ts {
                fields.push((name.to_string(), format_ts(&ts)));
            }
        }
        if let Some(issued) = self.issued_jobs {
            fields.push(("issued_jobs".to_string(), issued.to_string()));
        }
        fields
    }

    /// Rebuild from a stored hash. Unparseable optional fields are dropped.
    pub fn from_fields(id: RunId, fields: &HashMap<String, String>) -> Result<Self, serde_json::Error> {
        let get = |name: &str| fields.get(name).map(String::as_str);
        let count = |name: &str| get(name).and_then(|v| v.parse::<usize>().ok()).unwrap_or(0);
        let ts = |name: &str| get(name).and_then(parse_ts);

        let workers: Vec<String> = serde_json::from_str(get("workers_json").unwrap_or("[]"))?;
        let params = match get("params_json") {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
            _ => serde_json::Value::Object(Default::default()),
        };

        Ok(Self {
            id,
            name: get("name").unwrap_or_default().to_string(),
            status: get("status")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            params,
            worker_count: workers.len(),
            workers,
            created_at: ts("created_at").unwrap_or(DateTime::<Utc>::MIN_UTC),
            started_at: ts("started_at"),
            finished_at: ts("finished_at"),
            cancelled_at: ts("cancelled_at"),
            reset_at: ts("reset_at"),
            repo_count: count("repo_count"),
            expected_jobs: count("expected_jobs"),
            issued_jobs: get("issued_jobs").and_then(|v| v.parse().ok()),
        })
    }

    /// Sort key for listings: creation time, falling back to start time.
    pub fn listed_at(&self) -> DateTime<Utc> {
        if self.created_at == DateTime::<Utc>::MIN_UTC {
            self.started_at.unwrap_or(self.created_at)
        } else {
            self.created_at
        }
    }
}

/// One job as persisted in the `run:{run}:job:{job}` hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub run_id: RunId,
    pub repo_full_name: String,
    pub worker: String,
    pub status: JobStatus,
    pub sent_at: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
    pub result: Option<crate::payload::JobResult>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn fired(id: JobId, run_id: RunId, repo_full_name: &str, worker: &str) -> Self {
        Self {
            id,
            run_id,
            repo_full_name: repo_full_name.to_string(),
            worker: worker.to_string(),
            status: JobStatus::Fired,
            sent_at: now_utc(),
            received_at: None,
            result: None,
            cancelled_at: None,
        }
    }

    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("worker".to_string(), self.worker.clone()),
            ("repo_full_name".to_string(), self.repo_full_name.clone()),
            ("status".to_string(), self.status.to_string()),
            ("sent_at".to_string(), format_ts(&self.sent_at)),
        ]
    }

    pub fn from_fields(
        id: JobId,
        run_id: RunId,
        fields: &HashMap<String, String>,
    ) -> Result<Self, crate::error::OrchestratorError> {
        let get = |name: &str| fields.get(name).map(String::as_str);
        let status = get("status")
            .unwrap_or("fired")
            .parse::<JobStatus>()
            .map_err(|err| crate::error::OrchestratorError::Malformed(err.to_string()))?;
        let result = match get("result_json") {
            Some(raw) if !raw.is_empty() => Some(serde_json::from_str(raw)?),
            _ => None,
        };

        Ok(Self {
            id,
            run_id,
            repo_full_name: get("repo_full_name").unwrap_or_default().to_string(),
            worker: get("worker").unwrap_or_default().to_string(),
            status,
            sent_at: get("sent_at")
                .and_then(parse_ts)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            received_at: get("received_at").and_then(parse_ts),
            result,
            cancelled_at: get("cancelled_at").and_then(parse_ts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Fired.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());

        assert!(JobStatus::is_terminal_str(Some("failed")));
        assert!(!JobStatus::is_terminal_str(Some("fired")));
        assert!(!JobStatus::is_terminal_str(Some("")));
        assert!(!JobStatus::is_terminal_str(None));
    }

    #[test]
    fn test_repo_ref_accepts_github_aliases() {
        let raw = r#"{"full_name":" acme/widgets ","git_url":"https://example.com/w.git",
                      "default_branch":"dev","stargazers_count":12,"size":340}"#;
        let repo: RepoRef = serde_json::from_str(raw).unwrap();
        let repo = repo.normalized();

        assert_eq!(repo.full_name, "acme/widgets");
        assert_eq!(repo.clone_url, "https://example.com/w.git");
        assert_eq!(repo.branch.as_deref(), Some("dev"));
        assert_eq!(repo.stars, Some(12));
        assert_eq!(repo.size_kb, Some(340));
        assert!(repo.needs_enrichment());
    }

    #[test]
    fn test_repo_ref_decodes_full_github_item() {
        let raw = r#"{
            "id": 1296269,
            "name": "widgets",
            "full_name": "acme/widgets",
            "owner": {"login": "acme", "id": 1},
            "private": false,
            "git_url": "git://github.com/acme/widgets.git",
            "clone_url": "https://github.com/acme/widgets.git",
            "ssh_url": "git@github.com:acme/widgets.git",
            "default_branch": "trunk",
            "branch": "release",
            "language": "Java",
            "stargazers_count": 80,
            "size": 108,
            "size_kb": 7
        }"#;
        let repo: RepoRef = serde_json::from_str(raw).unwrap();

        assert_eq!(repo.clone_url, "https://github.com/acme/widgets.git");
        assert_eq!(repo.branch.as_deref(), Some("trunk"));
        assert_eq!(repo.language.as_deref(), Some("Java"));
        assert_eq!(repo.stars, Some(80));
        assert_eq!(repo.size_kb, Some(108));
    }

    #[test]
    fn test_repo_ref_falls_back_across_spellings() {
        let raw = r#"{"full_name":"a/b","clone_url":"","git_url":"git://x/b.git",
                      "default_branch":null,"branch":"dev","size":null,"size_kb":12}"#;
        let repo: RepoRef = serde_json::from_str(raw).unwrap();
        assert_eq!(repo.clone_url, "git://x/b.git");
        assert_eq!(repo.branch.as_deref(), Some("dev"));
        assert_eq!(repo.size_kb, Some(12));

        let stored = serde_json::to_string(&repo).unwrap();
        assert_eq!(serde_json::from_str::<RepoRef>(&stored).unwrap(), repo);
    }

    #[test]
    fn test_repo_ref_defaults_clone_url_and_branch() {
        let repo = RepoRef::new("a/b");
        assert_eq!(repo.clone_url, "https://github.com/a/b.git");
        assert_eq!(repo.effective_branch(), "main");
    }

    #[test]
    fn test_run_meta_fields_round_trip() {
        let meta = RunMeta::new(
            RunId::new(),
            "nightly",
            serde_json::json!({"source": "cli"}),
            3,
            vec!["cdxgen".into(), "cbomkit".into()],
        );
        assert_eq!(meta.expected_jobs, 6);

        let fields: HashMap<String, String> = meta.to_fields().into_iter().collect();
        assert_eq!(fields["workers_json"], r#"["cdxgen","cbomkit"]"#);
        assert!(fields["created_at"].ends_with('Z'));

        let restored = RunMeta::from_fields(meta.id, &fields).unwrap();
        assert_eq!(restored, meta);
    }

    #[test]
    fn test_timestamp_format_has_no_fraction() {
        let ts = now_utc();
        let raw = format_ts(&ts);
        assert!(!raw.contains('.'));
        assert_eq!(parse_ts(&raw), Some(ts));
    }

    #[test]
    fn test_pair_key() {
        assert_eq!(pair_key("a/b", "w1"), "a/b|w1");
    }
}
