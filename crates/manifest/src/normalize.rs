use tracing::instrument;

use crate::error::Result;
use crate::{Dist, Manifest, SyncKey, VersionRecord};

/// Top-level entrypoint for turning fetched `composer.json` bytes into a
/// [`VersionRecord`].
///
/// The manifest's `version` field is replaced by `version` and its `dist`
/// field by a zip descriptor pointing at `dist_url`.
///
/// # Errors
///
/// Returns a validation error if:
/// - the bytes are not a JSON object,
/// - the object has no usable `name`, or
/// - `version` is empty.
///
/// Callers drop the event on error; there is nothing to retry.
#[instrument(skip(raw, dist_url, sync_key), fields(raw_size = raw.as_ref().len(), package))]
pub fn normalize(
    raw: impl AsRef<[u8]>,
    version: &str,
    dist_url: impl Into<String>,
    sync_key: Option<SyncKey>,
) -> Result<VersionRecord> {
    let manifest = Manifest::from_slice(raw.as_ref())?;
    let record = VersionRecord::new(manifest, version, Dist::zip(dist_url), sync_key)?;
    tracing::Span::current().record("package", record.package.as_str());
    Ok(record)
}
