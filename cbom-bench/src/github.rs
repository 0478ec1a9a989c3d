use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::GithubConfig;
use crate::enrich::{RepoMetadata, RepoMetadataProvider};
use crate::store::{keys, SharedStore};

/// GitHub REST lookups cached in the shared store.
///
/// Responses are cached under `gh:repo:{name}:meta` and
/// `gh:repo:{name}:languages` for `cache_ttl_secs`. Without a token the
/// provider only reads the cache, so unauthenticated coordinators never hit
/// the API rate limit.
pub struct GithubMetadataProvider<S: ?Sized> {
    store: Arc<S>,
    client: reqwest::Client,
    config: GithubConfig,
}

impl<S: SharedStore + ?Sized> GithubMetadataProvider<S> {
    pub fn new(store: Arc<S>, config: GithubConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("building GitHub HTTP client")?;
        Ok(Self {
            store,
            client,
            config,
        })
    }

    async fn cached_or_fetch<T: DeserializeOwned>(
        &self,
        cache_key: &str,
        path: &str,
    ) -> anyhow::Result<Option<T>> {
        if let Some(raw) = self.store.get(cache_key).await? {
            match serde_json::from_str(&raw) {
                Ok(value) => return Ok(Some(value)),
                Err(err) => debug!(key = %cache_key, error = %err, "ignoring unreadable cache entry"),
            }
        }

        let Some(token) = self.config.token.as_deref() else {
            return Ok(None);
        };

        let url = format!("{}/{}", self.config.api_base.trim_end_matches('/'), path);
        let body = self
            .client
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "cbom-bench")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?
            .text()
            .await
            .with_context(|| format!("reading body of {url}"))?;

        let value = serde_json::from_str(&body).with_context(|| format!("decoding {url}"))?;
        self.store
            .set_ex(cache_key, &body, self.config.cache_ttl())
            .await?;
        Ok(Some(value))
    }
}

#[async_trait]
impl<S: SharedStore + ?Sized + 'static> RepoMetadataProvider for GithubMetadataProvider<S> {
    async fn repo_meta(&self, full_name: &str) -> anyhow::Result<Option<RepoMetadata>> {
        self.cached_or_fetch(&keys::github_meta(full_name), &format!("repos/{full_name}"))
            .await
    }

    async fn top_language(&self, full_name: &str) -> anyhow::Result<Option<String>> {
        let languages: Option<HashMap<String, u64>> = self
            .cached_or_fetch(
                &keys::github_languages(full_name),
                &format!("repos/{full_name}/languages"),
            )
            .await?;
        Ok(languages.and_then(dominant_language))
    }
}

/// Language with the most bytes; ties go to the alphabetically first name.
fn dominant_language(languages: HashMap<String, u64>) -> Option<String> {
    languages
        .into_iter()
        .max_by(|(a_name, a_bytes), (b_name, b_bytes)| {
            a_bytes.cmp(b_bytes).then_with(|| b_name.cmp(a_name))
        })
        .map(|(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    #[test]
    fn test_dominant_language() {
        let languages = HashMap::from([
            ("Rust".to_string(), 900),
            ("Shell".to_string(), 20),
            ("C".to_string(), 900),
        ]);
        assert_eq!(dominant_language(languages).as_deref(), Some("C"));
        assert!(dominant_language(HashMap::new()).is_none());
    }

    #[tokio::test]
    async fn test_reads_cache_without_token() {
        let store = Arc::new(InMemoryStore::new());
        store
            .set_ex(
                &keys::github_meta("a/b"),
                r#"{"default_branch":"trunk","stargazers_count":3,"size":42,"id":1}"#,
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        store
            .set_ex(
                &keys::github_languages("a/b"),
                r#"{"Go":10,"Java":99}"#,
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let provider = GithubMetadataProvider::new(store, GithubConfig::default()).unwrap();
        let meta = provider.repo_meta("a/b").await.unwrap().unwrap();
        assert_eq!(meta.default_branch.as_deref(), Some("trunk"));
        assert_eq!(meta.stars, Some(3));
        assert_eq!(meta.size_kb, Some(42));
        assert_eq!(provider.top_language("a/b").await.unwrap().as_deref(), Some("Java"));
    }

    #[tokio::test]
    async fn test_cache_miss_without_token_is_unknown() {
        let store = Arc::new(InMemoryStore::new());
        let provider = GithubMetadataProvider::new(store, GithubConfig::default()).unwrap();
        assert!(provider.repo_meta("x/y").await.unwrap().is_none());
        assert!(provider.top_language("x/y").await.unwrap().is_none());
    }
}
