use comreg_index::{PrimaryKey, VersionStore};
use comreg_manifest::normalize;
use exn::ResultExt;
use futures::StreamExt;
use std::collections::BTreeMap;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::error::{ErrorKind, Result};
use crate::registry::{ProviderHandle, Providers};
use crate::webhook::Webhook;
use crate::{Provider, SyncEvent};

/// What applying one [`SyncEvent`] did to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Stored(PrimaryKey),
    /// `None` when the sync key was not indexed.
    Removed(Option<PrimaryKey>),
    /// The manifest failed validation; nothing was written.
    Dropped,
}

/// Counts from one provider's full resync.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResyncSummary {
    pub upserted: usize,
    pub removed: usize,
    /// Refs whose manifest failed validation.
    pub dropped: usize,
    /// Refs whose content could not be fetched.
    pub skipped: usize,
}

/// Drives provider events into the version index.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct Synchronizer {
    store: VersionStore,
}

impl Synchronizer {
    pub fn new(store: VersionStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Normalize and store an upsert, or remove by sync key.
    ///
    /// A manifest that fails validation is logged and dropped, and the call
    /// still succeeds: retrying cannot fix upstream content.
    pub async fn apply(&self, event: SyncEvent) -> Result<Applied> {
        match event {
            SyncEvent::Upsert { manifest, version, dist_url, sync_key } => {
                let record = match normalize(&manifest, &version, dist_url, Some(sync_key.clone())) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!(%sync_key, %version, error = ?e, "dropping invalid manifest");
                        return Ok(Applied::Dropped);
                    },
                };
                self.store.upsert(&record).await.or_raise(|| ErrorKind::Storage)?;
                tracing::debug!(package = %record.package, version = %record.version, "version upserted");
                Ok(Applied::Stored(PrimaryKey::new(record.package, record.version)))
            },
            SyncEvent::Remove(sync_key) => {
                let removed = self.store.remove(&sync_key).await.or_raise(|| ErrorKind::Storage)?;
                tracing::debug!(%sync_key, found = removed.is_some(), "version removed");
                Ok(Applied::Removed(removed))
            },
        }
    }

    /// Run one provider's full resync to completion.
    ///
    /// Refs that cannot be fetched are skipped. A listing failure or a
    /// storage failure ends the resync with an error; everything applied
    /// before it stays applied.
    #[instrument(skip_all, fields(provider = provider.name()))]
    pub async fn resync(&self, provider: &dyn Provider) -> Result<ResyncSummary> {
        let mut summary = ResyncSummary::default();
        let mut events = provider.synchronize();
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) if *e == ErrorKind::Listing => return Err(e),
                Err(e) => {
                    tracing::warn!(error = ?e, "skipping ref");
                    summary.skipped += 1;
                    continue;
                },
            };
            match self.apply(event).await? {
                Applied::Stored(_) => summary.upserted += 1,
                Applied::Removed(_) => summary.removed += 1,
                Applied::Dropped => summary.dropped += 1,
            }
        }
        tracing::info!(
            upserted = summary.upserted,
            dropped = summary.dropped,
            skipped = summary.skipped,
            "resync complete",
        );
        Ok(summary)
    }

    /// Resync every provider in turn. A failing provider is logged and does
    /// not stop the others.
    pub async fn resync_all(&self, providers: &Providers) -> BTreeMap<String, Result<ResyncSummary>> {
        let mut results = BTreeMap::new();
        for (name, provider) in providers.iter() {
            let result = self.resync(provider.as_ref()).await;
            if let Err(e) = &result {
                tracing::error!(provider = name, error = ?e, "resync failed");
            }
            results.insert(name.to_string(), result);
        }
        results
    }

    /// Run [`resync`](Self::resync) as an independent background task.
    ///
    /// There is no cancellation; triggering a resync while one is running
    /// only repeats idempotent upserts.
    pub fn spawn_resync(&self, provider: ProviderHandle) -> JoinHandle<Result<ResyncSummary>> {
        let synchronizer = self.clone();
        tokio::spawn(async move {
            let result = synchronizer.resync(provider.as_ref()).await;
            if let Err(e) = &result {
                tracing::error!(provider = provider.name(), error = ?e, "background resync failed");
            }
            result
        })
    }

    /// Spawn a resync for every provider configured to fetch on start.
    pub fn spawn_startup_resyncs(&self, providers: &Providers) -> Vec<JoinHandle<Result<ResyncSummary>>> {
        providers.fetch_on_start().map(|provider| self.spawn_resync(provider.clone())).collect()
    }

    /// Handle a webhook addressed to the provider called `name`.
    ///
    /// Returns `Ok(None)` for deliveries the provider ignores. Errors of a
    /// [retryable](ErrorKind::is_retryable) kind should be reported to the
    /// sender as a server error so its own delivery retry applies.
    #[instrument(skip(self, providers, webhook))]
    pub async fn handle_webhook(&self, providers: &Providers, name: &str, webhook: &Webhook) -> Result<Option<Applied>> {
        let provider = providers.get(name)?;
        let Some(event) = provider.handle_webhook(webhook).await? else {
            tracing::debug!("webhook carried no ref change");
            return Ok(None);
        };
        self.apply(event).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSource;
    use crate::{GitRef, RefProvider};
    use comreg_manifest::SyncKey;
    use comreg_storage::backend::MemoryBackend;
    use comreg_storage::Backend;
    use serde_json::json;
    use std::sync::Arc;

    const REPO: &str = "acme/widget";
    const MANIFEST: &str = r#"{"name":"acme/widget","description":"A widget","require":{"php":">=8.1"}}"#;

    fn synchronizer() -> Synchronizer {
        Synchronizer::new(VersionStore::new(Arc::new(MemoryBackend::default())))
    }

    fn source() -> MockSource {
        MockSource::new("mock")
            .with_tag(REPO, "1.0.0", MANIFEST)
            .with_tag(REPO, "1.1.0", MANIFEST)
            .with_branch(REPO, "Main", MANIFEST)
    }

    fn github_push(git_ref: &GitRef, deleted: bool) -> Webhook {
        let commit = MockSource::commit(REPO, git_ref);
        let body = json!({
            "ref": git_ref.qualified(),
            "after": if deleted { "0000000000000000000000000000000000000000".to_string() } else { commit },
            "deleted": deleted,
            "repository": {"full_name": REPO}
        });
        Webhook::new(body.to_string()).with_header("X-GitHub-Event", "push")
    }

    async fn entry_count(synchronizer: &Synchronizer) -> usize {
        synchronizer.store().backend().scan("packages", b"").await.unwrap().len()
    }

    fn providers(provider: ProviderHandle) -> Providers {
        let mut providers = Providers::default();
        providers.register("mock", provider, true);
        providers
    }

    #[tokio::test]
    async fn test_resync_stores_every_ref() {
        let synchronizer = synchronizer();
        let summary = synchronizer.resync(&RefProvider::new(source())).await.unwrap();
        assert_eq!(summary, ResyncSummary { upserted: 3, ..ResyncSummary::default() });
        let store = synchronizer.store();
        assert_eq!(store.list_versions(REPO, false).await.unwrap().len(), 2);
        let dev = store.list_versions(REPO, true).await.unwrap();
        assert_eq!(dev[0].version(), Some("dev-main"));
        assert_eq!(
            dev[0].get("dist"),
            Some(&json!({"url": "https://mock.test/acme/widget/zipball/acme/widget@refs/heads/Main", "type": "zip"}))
        );
        // Three primary entries plus three index entries.
        assert_eq!(entry_count(&synchronizer).await, 6);
    }

    #[tokio::test]
    async fn test_resync_is_idempotent() {
        let synchronizer = synchronizer();
        let provider = RefProvider::new(source());
        synchronizer.resync(&provider).await.unwrap();
        let before = synchronizer.store().backend().scan("packages", b"").await.unwrap();
        synchronizer.resync(&provider).await.unwrap();
        let after = synchronizer.store().backend().scan("packages", b"").await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_pagination_stops_on_short_page() {
        let mut source = MockSource::new("mock");
        for i in 0..250 {
            source = source.with_tag(REPO, &format!("1.0.{i}"), MANIFEST);
        }
        let provider = RefProvider::new(source);
        let summary = synchronizer().resync(&provider).await.unwrap();
        assert_eq!(summary.upserted, 250);
        // Tags: 100 + 100 + 50. Branches: one empty page.
        assert_eq!(provider.source().list_calls(), 4);
    }

    #[tokio::test]
    async fn test_pagination_exact_multiple_reads_an_empty_page() {
        let mut source = MockSource::new("mock");
        for i in 0..200 {
            source = source.with_tag(REPO, &format!("2.0.{i}"), MANIFEST);
        }
        let provider = RefProvider::new(source);
        assert_eq!(synchronizer().resync(&provider).await.unwrap().upserted, 200);
        assert_eq!(provider.source().list_calls(), 4);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_one_ref() {
        let synchronizer = synchronizer();
        let provider = RefProvider::new(source().failing_fetch(REPO, &GitRef::tag("1.0.0")));
        let summary = synchronizer.resync(&provider).await.unwrap();
        assert_eq!(summary, ResyncSummary { upserted: 2, skipped: 1, ..ResyncSummary::default() });
        assert_eq!(synchronizer.store().get(REPO, "1.0.0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_manifest_is_dropped() {
        let synchronizer = synchronizer();
        let source = source().with_tag(REPO, "0.9.0", r#"{"description":"no name"}"#).with_tag(REPO, "0.8.0", "garbage");
        let summary = synchronizer.resync(&RefProvider::new(source)).await.unwrap();
        assert_eq!(summary, ResyncSummary { upserted: 3, dropped: 2, ..ResyncSummary::default() });
    }

    #[tokio::test]
    async fn test_listing_failure_ends_provider_resync() {
        let synchronizer = synchronizer();
        let provider = RefProvider::new(MockSource::new("mock").failing_listing(REPO));
        let err = synchronizer.resync(&provider).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Listing);
        assert!(err.is_retryable());
        assert_eq!(provider.source().list_calls(), 1);
    }

    #[tokio::test]
    async fn test_resync_all_continues_past_failures() {
        let synchronizer = synchronizer();
        let mut providers = Providers::default();
        providers.register("broken", Arc::new(RefProvider::new(MockSource::new("broken").failing_listing("x/y"))), false);
        providers.register("working", Arc::new(RefProvider::new(source())), false);
        let results = synchronizer.resync_all(&providers).await;
        assert_eq!(**results["broken"].as_ref().unwrap_err(), ErrorKind::Listing);
        assert_eq!(results["working"].as_ref().unwrap().upserted, 3);
        assert_eq!(synchronizer.store().list_package_names().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_resync() {
        let synchronizer = Synchronizer::new(VersionStore::new(Arc::new(MemoryBackend::rejecting_writes())));
        let err = synchronizer.resync(&RefProvider::new(source())).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Storage);
    }

    #[tokio::test]
    async fn test_spawned_resync() {
        let synchronizer = synchronizer();
        let handles = synchronizer.spawn_startup_resyncs(&providers(Arc::new(RefProvider::new(source()))));
        assert_eq!(handles.len(), 1);
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().upserted, 3);
        }
        assert_eq!(synchronizer.store().list_package_names().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_push_and_delete() {
        let synchronizer = synchronizer();
        let providers = providers(Arc::new(RefProvider::new(source().with_branch(REPO, "feature", MANIFEST))));
        let branch = GitRef::branch("feature");

        let applied = synchronizer.handle_webhook(&providers, "mock", &github_push(&branch, false)).await.unwrap();
        assert_eq!(applied, Some(Applied::Stored(PrimaryKey::new(REPO, "dev-feature"))));

        let applied = synchronizer.handle_webhook(&providers, "mock", &github_push(&branch, true)).await.unwrap();
        assert_eq!(applied, Some(Applied::Removed(Some(PrimaryKey::new(REPO, "dev-feature")))));
        assert_eq!(entry_count(&synchronizer).await, 0);

        // Replaying the deletion is a no-op.
        let applied = synchronizer.handle_webhook(&providers, "mock", &github_push(&branch, true)).await.unwrap();
        assert_eq!(applied, Some(Applied::Removed(None)));
    }

    #[tokio::test]
    async fn test_webhook_deletes_what_resync_created() {
        let synchronizer = synchronizer();
        let provider: ProviderHandle = Arc::new(RefProvider::new(source()));
        synchronizer.resync(provider.as_ref()).await.unwrap();
        let providers = providers(provider);

        let tag = GitRef::tag("1.0.0");
        assert_eq!(synchronizer.store().resolve(&SyncKey::new("acme/widget@refs/tags/1.0.0")).await.unwrap(), Some(PrimaryKey::new(REPO, "1.0.0")));
        synchronizer.handle_webhook(&providers, "mock", &github_push(&tag, true)).await.unwrap();
        assert_eq!(synchronizer.store().get(REPO, "1.0.0").await.unwrap(), None);
        assert!(synchronizer.store().get(REPO, "1.1.0").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_webhook_ping_is_ignored() {
        let synchronizer = synchronizer();
        let providers = providers(Arc::new(RefProvider::new(source())));
        let ping = Webhook::new(r#"{"zen":"Design for failure."}"#).with_header("X-GitHub-Event", "ping");
        assert_eq!(synchronizer.handle_webhook(&providers, "mock", &ping).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_webhook_unknown_provider() {
        let synchronizer = synchronizer();
        let err = synchronizer.handle_webhook(&Providers::default(), "nope", &Webhook::new("{}")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::UnknownProvider("nope".to_string()));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_webhook_signature_is_checked() {
        let synchronizer = synchronizer();
        let providers = providers(Arc::new(RefProvider::new(source().with_secret("s3cret"))));
        let err = synchronizer
            .handle_webhook(&providers, "mock", &github_push(&GitRef::branch("Main"), false))
            .await
            .unwrap_err();
        assert_eq!(*err, ErrorKind::MissingHeader("X-Hub-Signature-256"));
        assert_eq!(entry_count(&synchronizer).await, 0);
    }

    #[tokio::test]
    async fn test_webhook_fetch_failure_is_retryable() {
        let synchronizer = synchronizer();
        let branch = GitRef::branch("gone");
        let providers = providers(Arc::new(RefProvider::new(source())));
        let err = synchronizer.handle_webhook(&providers, "mock", &github_push(&branch, false)).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Upstream);
        assert!(err.is_retryable());
    }
}
