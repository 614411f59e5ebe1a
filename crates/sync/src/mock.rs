//! In-memory ref source for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{ErrorKind, Result};
use crate::provider::{RefSource, RemoteRef};
use crate::webhook::{PushEvent, Webhook, parse_github_push};
use crate::{GitRef, RefKind};

#[derive(Default)]
struct MockRepository {
    tags: Vec<RemoteRef>,
    branches: Vec<RemoteRef>,
}

/// A [`RefSource`] serving refs and manifests from memory.
///
/// Commits are named `{repository}@{ref}`. Push payloads use the GitHub
/// format.
#[derive(Default)]
pub struct MockSource {
    name: String,
    secret: String,
    repositories: BTreeMap<String, MockRepository>,
    manifests: HashMap<String, Vec<u8>>,
    failing_listings: HashSet<String>,
    failing_fetches: HashSet<String>,
    list_calls: AtomicUsize,
}

impl MockSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn commit(repository: &str, git_ref: &GitRef) -> String {
        format!("{repository}@{}", git_ref.qualified())
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    pub fn with_tag(self, repository: &str, name: &str, manifest: impl Into<Vec<u8>>) -> Self {
        self.with_ref(repository, GitRef::tag(name), manifest)
    }

    pub fn with_branch(self, repository: &str, name: &str, manifest: impl Into<Vec<u8>>) -> Self {
        self.with_ref(repository, GitRef::branch(name), manifest)
    }

    fn with_ref(mut self, repository: &str, git_ref: GitRef, manifest: impl Into<Vec<u8>>) -> Self {
        let commit = Self::commit(repository, &git_ref);
        self.manifests.insert(commit.clone(), manifest.into());
        let repo = self.repositories.entry(repository.to_string()).or_default();
        let refs = match git_ref.kind {
            RefKind::Tag => &mut repo.tags,
            RefKind::Branch => &mut repo.branches,
        };
        refs.push(RemoteRef { git_ref, commit });
        self
    }

    /// Every listing of `repository` fails.
    pub fn failing_listing(mut self, repository: &str) -> Self {
        self.repositories.entry(repository.to_string()).or_default();
        self.failing_listings.insert(repository.to_string());
        self
    }

    /// Fetching the manifest of this ref fails.
    pub fn failing_fetch(mut self, repository: &str, git_ref: &GitRef) -> Self {
        self.failing_fetches.insert(Self::commit(repository, git_ref));
        self
    }

    /// Number of [`list_refs`](RefSource::list_refs) calls so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn repositories(&self) -> Vec<String> {
        self.repositories.keys().cloned().collect()
    }

    async fn list_refs(&self, repository: &str, kind: RefKind, page: u32, per_page: u32) -> Result<Vec<RemoteRef>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_listings.contains(repository) {
            exn::bail!(ErrorKind::Upstream);
        }
        let Some(repo) = self.repositories.get(repository) else {
            return Ok(Vec::new());
        };
        let refs = match kind {
            RefKind::Tag => &repo.tags,
            RefKind::Branch => &repo.branches,
        };
        let skip = page.saturating_sub(1) as usize * per_page as usize;
        Ok(refs.iter().skip(skip).take(per_page as usize).cloned().collect())
    }

    async fn fetch_manifest(&self, _repository: &str, commit: &str) -> Result<Vec<u8>> {
        if self.failing_fetches.contains(commit) {
            exn::bail!(ErrorKind::Upstream);
        }
        match self.manifests.get(commit) {
            Some(manifest) => Ok(manifest.clone()),
            None => exn::bail!(ErrorKind::Upstream),
        }
    }

    fn archive_url(&self, repository: &str, commit: &str) -> String {
        format!("https://mock.test/{repository}/zipball/{commit}")
    }

    fn parse_push(&self, webhook: &Webhook) -> Result<Option<PushEvent>> {
        parse_github_push(webhook, &self.secret)
    }
}
