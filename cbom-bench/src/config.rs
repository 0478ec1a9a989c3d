use std::io::Read;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::model::RepoRef;

const DEFAULT_REDIS_HOST: &str = "localhost";
const DEFAULT_REDIS_PORT: u16 = 6379;

/// Connection settings for the shared store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Connection URL (e.g., "redis://localhost:6379").
    pub url: String,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn from_host_port(host: &str, port: u16) -> Self {
        Self::new(format!("redis://{host}:{port}"))
    }

    /// `REDIS_URL` when set, else `REDIS_HOST`/`REDIS_PORT`.
    pub fn from_env() -> anyhow::Result<Self> {
        if let Some(url) = non_empty_var("REDIS_URL") {
            return Ok(Self::new(url));
        }
        let host = non_empty_var("REDIS_HOST").unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string());
        let port = match non_empty_var("REDIS_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("REDIS_PORT must be a port number, got `{raw}`"))?,
            None => DEFAULT_REDIS_PORT,
        };
        Ok(Self::from_host_port(&host, port))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_host_port(DEFAULT_REDIS_HOST, DEFAULT_REDIS_PORT)
    }
}

/// Settings for the GitHub metadata provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GithubConfig {
    /// API token; without one only cached metadata is used.
    pub token: Option<String>,
    /// Lifetime of cached API responses, in seconds.
    pub cache_ttl_secs: u64,
    /// API root, overridable for GitHub Enterprise.
    pub api_base: String,
    /// Per-request timeout, in seconds.
    pub request_timeout_secs: u64,
}

impl GithubConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            token: non_empty_var("GITHUB_TOKEN"),
            cache_ttl_secs: non_empty_var("GITHUB_CACHE_TTL_SEC")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(defaults.cache_ttl_secs),
            ..defaults
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            cache_ttl_secs: 86_400,
            api_base: "https://api.github.com".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Repository entry of a portable benchmark config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchRepo {
    pub full_name: String,
    #[serde(default, alias = "clone_url")]
    pub git_url: String,
    #[serde(default, alias = "default_branch", skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl From<BenchRepo> for RepoRef {
    fn from(repo: BenchRepo) -> Self {
        RepoRef {
            full_name: repo.full_name,
            clone_url: repo.git_url,
            branch: repo.branch,
            ..Default::default()
        }
        .normalized()
    }
}

impl From<&RepoRef> for BenchRepo {
    fn from(repo: &RepoRef) -> Self {
        let repo = repo.clone().normalized();
        BenchRepo {
            full_name: repo.full_name,
            git_url: repo.clone_url,
            branch: repo.branch,
        }
    }
}

fn default_schema_version() -> String {
    "1".to_string()
}

/// Portable description of a benchmark, accepted by `run` and produced by `export`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub workers: Vec<String>,
    #[serde(default)]
    pub repos: Vec<BenchRepo>,
}

impl BenchmarkConfig {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw).context("config is not valid JSON")?;
        if config.schema_version != "1" {
            anyhow::bail!("unsupported schema_version `{}`", config.schema_version);
        }
        Ok(config)
    }

    /// Read from a file, or from stdin when `path` is `-`.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = if path == "-" {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("reading config from stdin")?;
            raw
        } else {
            std::fs::read_to_string(Path::new(path))
                .with_context(|| format!("reading config from {path}"))?
        };
        Self::from_json(&raw)
    }

    pub fn to_json_pretty(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn repo_refs(&self) -> Vec<RepoRef> {
        self.repos.iter().cloned().map(RepoRef::from).collect()
    }
}

/// Worker names from `AVAILABLE_WORKERS`.
pub fn available_workers_from_env() -> Vec<String> {
    parse_list(std::env::var("AVAILABLE_WORKERS").ok().as_deref())
}

/// Split on commas or whitespace, dropping blanks and repeats but keeping order.
pub fn parse_list(raw: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in raw
        .unwrap_or_default()
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|item| !item.is_empty())
    {
        if !out.iter().any(|seen| seen == item) {
            out.push(item.to_string());
        }
    }
    out
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list(Some("cdxgen, cbomkit\nsonar cdxgen,,")),
            vec!["cdxgen", "cbomkit", "sonar"]
        );
        assert!(parse_list(None).is_empty());
        assert!(parse_list(Some(" , ")).is_empty());
    }

    #[test]
    fn test_store_config_default() {
        assert_eq!(StoreConfig::default().url, "redis://localhost:6379");
    }

    #[test]
    fn test_benchmark_config_from_json() {
        let raw = r#"{
            "schema_version": "1",
            "name": "smoke",
            "workers": ["w1"],
            "repos": [{"full_name": "a/b", "git_url": "https://example.com/a/b.git"},
                      {"full_name": "c/d", "branch": "dev"}]
        }"#;
        let config = BenchmarkConfig::from_json(raw).unwrap();
        let repos = config.repo_refs();

        assert_eq!(repos[0].clone_url, "https://example.com/a/b.git");
        assert!(repos[0].branch.is_none());
        assert_eq!(repos[1].clone_url, "https://github.com/c/d.git");
        assert_eq!(repos[1].branch.as_deref(), Some("dev"));
    }

    #[test]
    fn test_rejects_unknown_schema() {
        let err = BenchmarkConfig::from_json(r#"{"schema_version":"2"}"#).unwrap_err();
        assert!(err.to_string().contains("schema_version"));
        assert!(BenchmarkConfig::from_json("[").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"name":"f","workers":["w1","w2"],"repos":[{{"full_name":"a/b"}}]}}"#
        )
        .unwrap();

        let config = BenchmarkConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.schema_version, "1");
        assert_eq!(config.workers, vec!["w1", "w2"]);
    }
}
