//! Best-effort repository metadata used to fill gaps in a run's snapshot.
//!
//! Lookups never block dispatch: every failure is returned to the caller as
//! an [`EnrichmentFailure`] so it can be logged and published, and the repo
//! keeps whatever data it already had.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::RepoRef;

/// Facts a hosting provider knows about a repository.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub default_branch: Option<String>,
    #[serde(alias = "stargazers_count")]
    pub stars: Option<u64>,
    #[serde(alias = "size")]
    pub size_kb: Option<u64>,
}

/// Source of repository metadata injected into the dispatcher.
#[async_trait]
pub trait RepoMetadataProvider: Send + Sync {
    /// Default branch, star count and size; `Ok(None)` when unknown.
    async fn repo_meta(&self, full_name: &str) -> anyhow::Result<Option<RepoMetadata>>;

    /// Dominant language by code volume; `Ok(None)` when unknown.
    async fn top_language(&self, full_name: &str) -> anyhow::Result<Option<String>>;
}

/// Provider that knows nothing. Snapshots are dispatched as given.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetadataProvider;

#[async_trait]
impl RepoMetadataProvider for NoopMetadataProvider {
    async fn repo_meta(&self, _full_name: &str) -> anyhow::Result<Option<RepoMetadata>> {
        Ok(None)
    }

    async fn top_language(&self, _full_name: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// One failed lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrichmentFailure {
    pub repo: String,
    pub field: &'static str,
    pub error: String,
}

/// Fill missing branch, stars, size and language in place.
///
/// Fields already present are never overwritten.
pub async fn enrich_repo(
    provider: &dyn RepoMetadataProvider,
    repo: &mut RepoRef,
) -> Vec<EnrichmentFailure> {
    let mut failures = Vec::new();

    if repo.branch.is_none() || repo.stars.is_none() || repo.size_kb.is_none() {
        match provider.repo_meta(&repo.full_name).await {
            Ok(Some(meta)) => {
                if repo.branch.is_none() {
                    repo.branch = meta.default_branch.filter(|b| !b.trim().is_empty());
                }
                repo.stars = repo.stars.or(meta.stars);
                repo.size_kb = repo.size_kb.or(meta.size_kb);
            }
            Ok(None) => {}
            Err(err) => failures.push(EnrichmentFailure {
                repo: repo.full_name.clone(),
                field: "repo_meta",
                error: format!("{err:#}"),
            }),
        }
    }

    if repo.language.is_none() {
        match provider.top_language(&repo.full_name).await {
            Ok(language) => repo.language = language,
            Err(err) => failures.push(EnrichmentFailure {
                repo: repo.full_name.clone(),
                field: "language",
                error: format!("{err:#}"),
            }),
        }
    }

    failures
}
