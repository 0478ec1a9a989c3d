use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cbom_bench::{CreateRun, RepoMetadata, RepoMetadataProvider, RepoRef};
use parking_lot::Mutex;

/// `org/repo-{i}` for `i` in `0..count`.
pub fn repos(count: usize) -> Vec<RepoRef> {
    (0..count).map(|i| RepoRef::new(format!("org/repo-{i}"))).collect()
}

/// `w1`..=`w{count}`.
pub fn workers(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("w{i}")).collect()
}

/// A run request over [`repos`] and [`workers`].
pub fn create_request(name: &str, repo_count: usize, worker_count: usize) -> CreateRun {
    CreateRun::new(name, repos(repo_count), workers(worker_count))
}

/// Metadata provider answering from a fixed table.
///
/// Repositories listed with [`StaticMetadata::failing`] return an error from
/// both lookups. Every lookup is counted.
#[derive(Clone, Default)]
pub struct StaticMetadata {
    meta: Arc<Mutex<HashMap<String, RepoMetadata>>>,
    languages: Arc<Mutex<HashMap<String, String>>>,
    failing: Arc<Mutex<Vec<String>>>,
    lookups: Arc<Mutex<usize>>,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(self, full_name: &str, branch: &str, stars: u64, size_kb: u64) -> Self {
        self.meta.lock().insert(
            full_name.to_string(),
            RepoMetadata {
                default_branch: Some(branch.to_string()),
                stars: Some(stars),
                size_kb: Some(size_kb),
            },
        );
        self
    }

    pub fn with_language(self, full_name: &str, language: &str) -> Self {
        self.languages
            .lock()
            .insert(full_name.to_string(), language.to_string());
        self
    }

    pub fn failing(self, full_name: &str) -> Self {
        self.failing.lock().push(full_name.to_string());
        self
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.lock()
    }

    fn check(&self, full_name: &str) -> anyhow::Result<()> {
        *self.lookups.lock() += 1;
        if self.failing.lock().iter().any(|name| name == full_name) {
            anyhow::bail!("rate limited while looking up {full_name}");
        }
        Ok(())
    }
}

#[async_trait]
impl RepoMetadataProvider for StaticMetadata {
    async fn repo_meta(&self, full_name: &str) -> anyhow::Result<Option<RepoMetadata>> {
        self.check(full_name)?;
        Ok(self.meta.lock().get(full_name).cloned())
    }

    async fn top_language(&self, full_name: &str) -> anyhow::Result<Option<String>> {
        self.check(full_name)?;
        Ok(self.languages.lock().get(full_name).cloned())
    }
}
