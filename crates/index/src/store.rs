use comreg_manifest::{Manifest, SyncKey, VersionRecord, is_dev};
use comreg_storage::BackendHandle;
use exn::{OptionExt, ResultExt};
use futures::TryStreamExt;
use std::collections::BTreeSet;
use tracing::instrument;

use crate::error::{ErrorKind, Result};
use crate::keys::{KEY_SEPARATOR, NAMESPACE, PRIMARY_PREFIX, PrimaryKey, index_key, package_prefix};

/// The persistent version index.
///
/// Two key families share the [`NAMESPACE`]: primary entries holding one
/// manifest per `(package, version)`, and reverse-index entries mapping a
/// [`SyncKey`] to the primary key it produced. Every write goes through a
/// single storage transaction, so readers never see a primary entry without
/// its index entry or the other way round.
///
/// Cheap to clone; clones share the same backend.
#[derive(Clone)]
pub struct VersionStore {
    backend: BackendHandle,
}

impl VersionStore {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    /// Insert or overwrite the version described by `record`.
    ///
    /// The stored manifest always carries the record's `version` and `dist`,
    /// whatever the manifest itself says. When the record has a sync key its
    /// index entry is written in the same transaction, replacing whatever the
    /// key pointed at before. Upserts never delete primary entries; only
    /// [`remove`](Self::remove) does.
    #[instrument(skip_all, fields(package = %record.package, version = %record.version))]
    pub async fn upsert(&self, record: &VersionRecord) -> Result<()> {
        if record.package.is_empty() {
            exn::bail!(ErrorKind::InvalidRecord("empty package name"));
        }
        if record.version.is_empty() {
            exn::bail!(ErrorKind::InvalidRecord("empty version label"));
        }
        if record.package.contains(KEY_SEPARATOR) {
            exn::bail!(ErrorKind::InvalidRecord("key separator in package name"));
        }
        let primary = PrimaryKey::new(&record.package, &record.version).to_bytes();
        let mut manifest = record.manifest.clone();
        manifest.stamp(&record.version, &record.dist);
        let bytes = manifest.to_vec().or_raise(|| ErrorKind::InvalidRecord("unserializable manifest"))?;

        let mut tx = self.backend.begin().await.or_raise(|| ErrorKind::Storage)?;
        if let Some(sync_key) = &record.sync_key {
            tx.put(NAMESPACE, &index_key(sync_key), &primary).await.or_raise(|| ErrorKind::Storage)?;
        }
        tx.put(NAMESPACE, &primary, &bytes).await.or_raise(|| ErrorKind::Storage)?;
        tx.commit().await.or_raise(|| ErrorKind::Storage)?;
        tracing::debug!("version stored");
        Ok(())
    }

    /// Delete the version that `sync_key` points at, along with the index
    /// entry itself.
    ///
    /// Returns the removed primary key, or `None` if the sync key is unknown
    /// (which is not an error).
    #[instrument(skip(self))]
    pub async fn remove(&self, sync_key: &SyncKey) -> Result<Option<PrimaryKey>> {
        let index = index_key(sync_key);
        let mut tx = self.backend.begin().await.or_raise(|| ErrorKind::Storage)?;
        let Some(primary) = tx.get(NAMESPACE, &index).await.or_raise(|| ErrorKind::Storage)? else {
            tracing::debug!("sync key not indexed; nothing to remove");
            return Ok(None);
        };
        tx.delete(NAMESPACE, &index).await.or_raise(|| ErrorKind::Storage)?;
        tx.delete(NAMESPACE, &primary).await.or_raise(|| ErrorKind::Storage)?;
        tx.commit().await.or_raise(|| ErrorKind::Storage)?;
        tracing::debug!(primary = %String::from_utf8_lossy(&primary), "version removed");
        Ok(PrimaryKey::parse(&primary))
    }

    /// Every package name with at least one stored version, sorted and
    /// deduplicated.
    #[instrument(skip(self))]
    pub async fn list_package_names(&self) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        let mut entries = self.backend.scan_stream(NAMESPACE, PRIMARY_PREFIX.as_bytes());
        while let Some(entry) = entries.try_next().await.or_raise(|| ErrorKind::Storage)? {
            let key = PrimaryKey::parse(&entry.key).ok_or_raise(|| corrupt_key(&entry.key))?;
            names.insert(key.package);
        }
        Ok(names)
    }

    /// Manifests of `package` whose label does (`want_dev`) or does not
    /// start with `dev-`, in key order (lexicographic by label).
    #[instrument(skip(self))]
    pub async fn list_versions(&self, package: &str, want_dev: bool) -> Result<Vec<Manifest>> {
        let prefix = package_prefix(package);
        let mut manifests = Vec::new();
        let mut entries = self.backend.scan_stream(NAMESPACE, &prefix);
        while let Some(entry) = entries.try_next().await.or_raise(|| ErrorKind::Storage)? {
            let key = PrimaryKey::parse(&entry.key).ok_or_raise(|| corrupt_key(&entry.key))?;
            if is_dev(&key.version) != want_dev {
                continue;
            }
            manifests.push(decode(&key, &entry.value)?);
        }
        Ok(manifests)
    }

    /// The stored manifest for one `(package, version)`.
    pub async fn get(&self, package: &str, version: &str) -> Result<Option<Manifest>> {
        let key = PrimaryKey::new(package, version);
        let value = self.backend.get(NAMESPACE, &key.to_bytes()).await.or_raise(|| ErrorKind::Storage)?;
        value.map(|value| decode(&key, &value)).transpose()
    }

    /// The primary key `sync_key` points at, if it is indexed.
    pub async fn resolve(&self, sync_key: &SyncKey) -> Result<Option<PrimaryKey>> {
        let value = self.backend.get(NAMESPACE, &index_key(sync_key)).await.or_raise(|| ErrorKind::Storage)?;
        value.map(|primary| PrimaryKey::parse(&primary).ok_or_raise(|| corrupt_key(&primary))).transpose()
    }
}

fn corrupt_key(raw: &[u8]) -> ErrorKind {
    ErrorKind::CorruptEntry(String::from_utf8_lossy(raw).into_owned())
}

fn decode(key: &PrimaryKey, value: &[u8]) -> Result<Manifest> {
    Manifest::from_slice(value).or_raise(|| ErrorKind::CorruptEntry(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use comreg_manifest::Dist;
    use comreg_storage::backend::{MemoryBackend, SqliteBackend};
    use comreg_storage::{Backend, BackendHandle};
    use rstest::rstest;
    use serde_json::json;
    use std::sync::Arc;

    async fn stores() -> Vec<VersionStore> {
        let sqlite = SqliteBackend::connect_in_memory().await.unwrap();
        vec![VersionStore::new(Arc::new(MemoryBackend::default())), VersionStore::new(Arc::new(sqlite))]
    }

    fn record(package: &str, version: &str, sync_key: Option<&str>) -> VersionRecord {
        let manifest = Manifest::from_slice(format!(r#"{{"name":"{package}","license":"MIT"}}"#).as_bytes()).unwrap();
        VersionRecord::new(manifest, version, Dist::zip(format!("https://example.test/{version}.zip")), sync_key.map(SyncKey::new))
            .unwrap()
    }

    async fn dump(backend: &BackendHandle) -> Vec<(String, String)> {
        backend
            .scan(NAMESPACE, b"")
            .await
            .unwrap()
            .into_iter()
            .map(|e| (String::from_utf8(e.key).unwrap(), String::from_utf8(e.value).unwrap()))
            .collect()
    }

    fn versions(manifests: &[Manifest]) -> Vec<&str> {
        manifests.iter().filter_map(Manifest::version).collect()
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        for store in stores().await {
            let r = record("acme/widget", "1.0.0", Some("acme/widget@refs/tags/1.0.0"));
            store.upsert(&r).await.unwrap();
            let before = dump(store.backend()).await;
            store.upsert(&r).await.unwrap();
            let after = dump(store.backend()).await;
            assert_eq!(before, after);
            assert_eq!(after.len(), 2);
            assert_eq!(after[0].0, "info--acme/widget@refs/tags/1.0.0");
            assert_eq!(after[0].1, "packages--acme/widget|1.0.0");
            assert_eq!(after[1].0, "packages--acme/widget|1.0.0");
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_manifest() {
        for store in stores().await {
            store.upsert(&record("acme/widget", "1.0.0", None)).await.unwrap();
            let mut changed = record("acme/widget", "1.0.0", None);
            changed.manifest =
                Manifest::from_slice(br#"{"name":"acme/widget","license":"Apache-2.0"}"#).unwrap();
            store.upsert(&changed).await.unwrap();
            let stored = store.get("acme/widget", "1.0.0").await.unwrap().unwrap();
            assert_eq!(stored.get("license"), Some(&json!("Apache-2.0")));
        }
    }

    #[tokio::test]
    async fn test_upsert_forces_version_and_dist() {
        for store in stores().await {
            let mut r = record("acme/widget", "1.0.0", None);
            r.manifest = Manifest::from_slice(br#"{"name":"acme/widget","version":"6.6.6"}"#).unwrap();
            store.upsert(&r).await.unwrap();
            let stored = store.get("acme/widget", "1.0.0").await.unwrap().unwrap();
            assert_eq!(stored.version(), Some("1.0.0"));
            assert_eq!(stored.get("dist"), Some(&json!({"url": "https://example.test/1.0.0.zip", "type": "zip"})));
        }
    }

    #[tokio::test]
    async fn test_upsert_without_sync_key_writes_no_index_entry() {
        for store in stores().await {
            store.upsert(&record("acme/widget", "1.0.0", None)).await.unwrap();
            let entries = dump(store.backend()).await;
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].0, "packages--acme/widget|1.0.0");
        }
    }

    #[tokio::test]
    async fn test_upsert_rejects_empty_labels() {
        for store in stores().await {
            let mut r = record("acme/widget", "1.0.0", None);
            r.version.clear();
            let err = store.upsert(&r).await.unwrap_err();
            assert!(matches!(&*err, ErrorKind::InvalidRecord(_)));

            let mut r = record("acme/widget", "1.0.0", None);
            r.package.clear();
            let err = store.upsert(&r).await.unwrap_err();
            assert!(matches!(&*err, ErrorKind::InvalidRecord(_)));
            assert!(dump(store.backend()).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_remove_deletes_both_entries() {
        for store in stores().await {
            let key = SyncKey::new("acme/widget@refs/heads/main");
            store.upsert(&record("acme/widget", "dev-main", Some(key.as_str()))).await.unwrap();
            store.upsert(&record("acme/widget", "1.0.0", None)).await.unwrap();
            let removed = store.remove(&key).await.unwrap();
            assert_eq!(removed, Some(PrimaryKey::new("acme/widget", "dev-main")));
            assert_eq!(store.resolve(&key).await.unwrap(), None);
            assert_eq!(store.get("acme/widget", "dev-main").await.unwrap(), None);
            let entries = dump(store.backend()).await;
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].0, "packages--acme/widget|1.0.0");
        }
    }

    #[tokio::test]
    async fn test_remove_unknown_key_is_noop() {
        for store in stores().await {
            store.upsert(&record("acme/widget", "1.0.0", Some("k"))).await.unwrap();
            let before = dump(store.backend()).await;
            assert_eq!(store.remove(&SyncKey::new("unknown")).await.unwrap(), None);
            assert_eq!(dump(store.backend()).await, before);
            // And again, after a real removal.
            store.remove(&SyncKey::new("k")).await.unwrap();
            assert_eq!(store.remove(&SyncKey::new("k")).await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_moved_sync_key_keeps_previous_entry() {
        for store in stores().await {
            store.upsert(&record("acme/old-name", "dev-main", Some("k"))).await.unwrap();
            store.upsert(&record("acme/new-name", "dev-main", Some("k"))).await.unwrap();
            assert!(store.get("acme/old-name", "dev-main").await.unwrap().is_some());
            assert_eq!(store.resolve(&SyncKey::new("k")).await.unwrap(), Some(PrimaryKey::new("acme/new-name", "dev-main")));
            assert_eq!(dump(store.backend()).await.len(), 3);
        }
    }

    #[tokio::test]
    async fn test_shared_entry_survives_when_one_key_moves() {
        for store in stores().await {
            let upstream = SyncKey::new("acme/widget@refs/tags/1.0.0");
            let fork = SyncKey::new("fork/widget@refs/tags/1.0.0");
            store.upsert(&record("acme/widget", "1.0.0", Some(upstream.as_str()))).await.unwrap();
            store.upsert(&record("acme/widget", "1.0.0", Some(fork.as_str()))).await.unwrap();
            // The fork renames its package; the upstream ref still owns the entry.
            store.upsert(&record("fork/widget", "1.0.0", Some(fork.as_str()))).await.unwrap();

            assert_eq!(store.resolve(&upstream).await.unwrap(), Some(PrimaryKey::new("acme/widget", "1.0.0")));
            assert!(store.get("acme/widget", "1.0.0").await.unwrap().is_some());
            assert_eq!(store.resolve(&fork).await.unwrap(), Some(PrimaryKey::new("fork/widget", "1.0.0")));
            assert!(store.get("fork/widget", "1.0.0").await.unwrap().is_some());
        }
    }

    #[rstest]
    #[case("acme|x/widget")]
    #[case("|acme/widget")]
    #[case("acme/widget|")]
    #[tokio::test]
    async fn test_upsert_rejects_key_separator(#[case] package: &str) {
        for store in stores().await {
            let mut r = record("acme/widget", "1.0.0", Some("k"));
            r.package = package.to_string();
            let err = store.upsert(&r).await.unwrap_err();
            assert!(matches!(&*err, ErrorKind::InvalidRecord(_)));
            assert!(dump(store.backend()).await.is_empty());
            assert!(store.list_package_names().await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_list_package_names_sorted_and_distinct() {
        for store in stores().await {
            for (package, version) in [("zeta/z", "1.0"), ("acme/widget", "1.0"), ("acme/widget", "dev-main"), ("acme/a", "2.0")] {
                store.upsert(&record(package, version, Some(format!("{package}@{version}").as_str()))).await.unwrap();
            }
            let names: Vec<_> = store.list_package_names().await.unwrap().into_iter().collect();
            assert_eq!(names, ["acme/a", "acme/widget", "zeta/z"]);
        }
    }

    #[tokio::test]
    async fn test_list_versions_partitions_by_dev_prefix() {
        for store in stores().await {
            for version in ["1.0.0", "dev-main", "1.10.0", "dev-feature", "2.0.0-dev", "1.2.0"] {
                store.upsert(&record("acme/widget", version, None)).await.unwrap();
            }
            store.upsert(&record("acme/widgets", "9.9.9", None)).await.unwrap();

            let releases = store.list_versions("acme/widget", false).await.unwrap();
            let dev = store.list_versions("acme/widget", true).await.unwrap();
            assert_eq!(versions(&releases), ["1.0.0", "1.10.0", "1.2.0", "2.0.0-dev"]);
            assert_eq!(versions(&dev), ["dev-feature", "dev-main"]);
        }
    }

    #[tokio::test]
    async fn test_list_versions_unknown_package() {
        for store in stores().await {
            assert!(store.list_versions("acme/nothing", false).await.unwrap().is_empty());
            assert!(store.list_package_names().await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_reported() {
        for store in stores().await {
            let mut tx = store.backend().begin().await.unwrap();
            tx.put(NAMESPACE, b"packages--acme/widget|1.0.0", b"not json").await.unwrap();
            tx.commit().await.unwrap();
            let err = store.list_versions("acme/widget", false).await.unwrap_err();
            assert_eq!(*err, ErrorKind::CorruptEntry("packages--acme/widget|1.0.0".to_string()));
        }
    }

    #[tokio::test]
    async fn test_storage_failure_is_retryable() {
        let store = VersionStore::new(Arc::new(MemoryBackend::rejecting_writes()));
        let err = store.upsert(&record("acme/widget", "1.0.0", Some("k"))).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Storage);
        assert!(err.is_retryable());
        let err = store.remove(&SyncKey::new("k")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Storage);
    }
}
