//! Packages published by uploading a zip archive instead of syncing a code
//! host.
//!
//! An upload carries the whole package; its `composer.json` names the
//! package and, unlike a ref-based provider, also supplies the version label.
//! Uploaded versions are keyed by `custom-{package}-{version}` so a later
//! delete request for the same package and version finds them.

use async_trait::async_trait;
use comreg_manifest::{Manifest, SyncKey};
use exn::{OptionExt, ResultExt};
use std::io::{Cursor, Read};
use tracing::instrument;
use zip::ZipArchive;

use crate::error::{ErrorKind, Result};
use crate::provider::{EventStream, Provider};
use crate::webhook::Webhook;
use crate::SyncEvent;

const MANIFEST_FILE: &str = "composer.json";
const MAX_MANIFEST_SIZE: u64 = 1024 * 1024;
const SYNC_KEY_PREFIX: &str = "custom-";

/// Sync key of an uploaded version.
pub fn custom_sync_key(package: &str, version: &str) -> SyncKey {
    SyncKey::new(format!("{SYNC_KEY_PREFIX}{package}-{version}"))
}

/// A provider fed by archive uploads.
///
/// There is nothing upstream to enumerate, so a resync yields no events and
/// webhooks are ignored. Requests are authorized by a bearer token equal to
/// the configured secret; an empty secret accepts every request.
pub struct CustomProvider {
    name: String,
    secret: String,
    base_url: String,
}

impl CustomProvider {
    /// `base_url` is the public URL of the repository; uploaded archives are
    /// served from `{base_url}/custom/{package}/{version}/file.zip`.
    pub fn new(name: impl Into<String>, secret: impl Into<String>, base_url: &str) -> Self {
        Self { name: name.into(), secret: secret.into(), base_url: base_url.trim_end_matches('/').to_string() }
    }

    /// Download URL of an uploaded version.
    pub fn archive_url(&self, package: &str, version: &str) -> String {
        format!("{}/custom/{package}/{version}/file.zip", self.base_url)
    }

    /// Turn an upload request, whose body is the package archive, into an
    /// upsert.
    ///
    /// The first `composer.json` in archive order is used, at any depth. It
    /// must name the package and carry a `version`.
    #[instrument(skip_all, fields(provider = %self.name, size = request.body().len()))]
    pub fn upload(&self, request: &Webhook) -> Result<SyncEvent> {
        self.authorize(request)?;
        let raw = find_manifest(request.body())?;
        let manifest = Manifest::from_slice(&raw).or_raise(|| ErrorKind::InvalidUpload("composer.json is not a JSON object"))?;
        let package = manifest.name().ok_or_raise(|| ErrorKind::InvalidUpload("composer.json has no package name"))?;
        let version = manifest.version().ok_or_raise(|| ErrorKind::InvalidUpload("composer.json has no version"))?;
        tracing::info!(package, version, "package uploaded");
        Ok(SyncEvent::Upsert {
            dist_url: self.archive_url(package, version),
            sync_key: custom_sync_key(package, version),
            version: version.to_string(),
            manifest: raw,
        })
    }

    /// Turn a delete request for one uploaded version into a removal.
    #[instrument(skip(self, request), fields(provider = %self.name))]
    pub fn delete(&self, request: &Webhook, package: &str, version: &str) -> Result<SyncEvent> {
        self.authorize(request)?;
        Ok(SyncEvent::Remove(custom_sync_key(package, version)))
    }

    fn authorize(&self, request: &Webhook) -> Result<()> {
        if self.secret.is_empty() {
            return Ok(());
        }
        let header = request.header("Authorization").ok_or_raise(|| ErrorKind::Unauthorized)?;
        let token = header.strip_prefix("Bearer ").or_else(|| header.strip_prefix("bearer ")).unwrap_or(header);
        // Digest equality is constant-time.
        if blake3::hash(token.as_bytes()) != blake3::hash(self.secret.as_bytes()) {
            exn::bail!(ErrorKind::Unauthorized);
        }
        Ok(())
    }
}

fn find_manifest(archive: &[u8]) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(archive)).or_raise(|| ErrorKind::InvalidArchive)?;
    for i in 0..archive.len() {
        let file = archive.by_index(i).or_raise(|| ErrorKind::InvalidArchive)?;
        if file.is_dir() || file.name().rsplit('/').next() != Some(MANIFEST_FILE) {
            continue;
        }
        if file.size() > MAX_MANIFEST_SIZE {
            exn::bail!(ErrorKind::InvalidUpload("composer.json is too large"));
        }
        let mut raw = Vec::new();
        file.take(MAX_MANIFEST_SIZE).read_to_end(&mut raw).or_raise(|| ErrorKind::InvalidArchive)?;
        return Ok(raw);
    }
    exn::bail!(ErrorKind::InvalidUpload("no composer.json in archive"))
}

#[async_trait]
impl Provider for CustomProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn synchronize(&self) -> EventStream<'_> {
        Box::pin(futures::stream::empty())
    }

    async fn handle_webhook(&self, _webhook: &Webhook) -> Result<Option<SyncEvent>> {
        tracing::debug!(provider = %self.name, "custom providers take uploads, not webhooks");
        Ok(None)
    }
}
