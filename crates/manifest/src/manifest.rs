use derive_more::Display;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{ErrorKind, Result};

/// A parsed `composer.json` document.
///
/// Field order is preserved exactly as received from upstream. Equality is
/// structural and ignores key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Map<String, Value>);

impl Manifest {
    /// Parse manifest bytes, requiring a top-level JSON object.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes).or_raise(|| ErrorKind::InvalidJson)?;
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => exn::bail!(ErrorKind::NotAnObject),
        }
    }

    /// Serialize the manifest into JSON bytes.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.0).or_raise(|| ErrorKind::Serialize)
    }

    /// The package name (`vendor/name`), if present and a string.
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    /// The version label, if present and a string.
    pub fn version(&self) -> Option<&str> {
        self.0.get("version").and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    /// Overwrite the fields the repository is authoritative for.
    ///
    /// Whatever upstream put in `version` and `dist` is discarded: the label is
    /// derived from the ref, and downloads always go through the archive URL.
    pub fn stamp(&mut self, version: &str, dist: &Dist) {
        self.0.insert("version".to_string(), Value::String(version.to_string()));
        self.0.insert("dist".to_string(), dist.to_value());
    }
}

impl From<Map<String, Value>> for Manifest {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Distribution descriptor served to clients.
///
/// Only zip archives are produced by the supported code hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dist {
    pub url: String,
}

impl Dist {
    /// The archive type every distribution is served as.
    pub const KIND: &'static str = "zip";

    pub fn zip(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn to_value(&self) -> Value {
        json!({ "url": self.url, "type": Self::KIND })
    }
}

/// Opaque identifier tying a stored version back to its upstream ref.
///
/// Derived from the upstream identity of the ref (repository and ref name),
/// never from the version label, so deleting a ref always finds the entry it
/// produced even if the label derivation changes.
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncKey(String);

impl SyncKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SyncKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Never valid in a package name; the index uses it to split keys.
const RESERVED_NAME_CHAR: char = '|';

/// A single version of a package, ready to be written to the index.
///
/// Construct through [`VersionRecord::new`] (or [`normalize`](crate::normalize))
/// so the manifest is always stamped with `version` and `dist`.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionRecord {
    /// Package name, `vendor/name`, taken from the manifest.
    pub package: String,
    /// Version label; `dev-` prefixed for branches.
    pub version: String,
    pub manifest: Manifest,
    pub dist: Dist,
    /// `None` when the upstream ref is not tracked; no index entry is written
    /// and the version can never be removed by key.
    pub sync_key: Option<SyncKey>,
}

impl VersionRecord {
    /// Validate and stamp a parsed manifest.
    ///
    /// # Errors
    /// - [`ErrorKind::MissingField`] if `name` is absent or the version label
    ///   is empty.
    /// - [`ErrorKind::InvalidField`] if `name` is not a non-empty string, or
    ///   contains `|` (reserved by the index key layout).
    pub fn new(
        mut manifest: Manifest,
        version: impl Into<String>,
        dist: Dist,
        sync_key: Option<SyncKey>,
    ) -> Result<Self> {
        let version = version.into();
        if version.is_empty() {
            exn::bail!(ErrorKind::MissingField("version"));
        }
        let package = match manifest.get("name") {
            None => exn::bail!(ErrorKind::MissingField("name")),
            Some(Value::String(name)) if !name.is_empty() && !name.contains(RESERVED_NAME_CHAR) => name.clone(),
            Some(other) => exn::bail!(ErrorKind::InvalidField { field: "name", value: other.to_string() }),
        };
        manifest.stamp(&version, &dist);
        Ok(Self { package, version, manifest, dist, sync_key })
    }
}
