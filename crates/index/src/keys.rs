//! Key layout of the `packages` namespace.
//!
//! ```text
//! packages--{package}|{version}  → manifest JSON
//! info--{sync key}               → primary key bytes
//! ```

use comreg_manifest::SyncKey;
use std::fmt;

/// The namespace holding every index entry.
pub const NAMESPACE: &str = "packages";
/// Prefix of every primary entry.
pub const PRIMARY_PREFIX: &str = "packages--";
/// Prefix of every reverse-index entry.
pub const INDEX_PREFIX: &str = "info--";
/// Separates package and version in a primary key. Package names must not
/// contain it.
pub const KEY_SEPARATOR: char = '|';

/// The primary key of one stored version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrimaryKey {
    pub package: String,
    pub version: String,
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PRIMARY_PREFIX}{}{KEY_SEPARATOR}{}", self.package, self.version)
    }
}

impl PrimaryKey {
    pub fn new(package: impl Into<String>, version: impl Into<String>) -> Self {
        Self { package: package.into(), version: version.into() }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parse a raw primary key.
    ///
    /// Package names never contain the separator, so the first one splits
    /// the key; version labels may.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let raw = std::str::from_utf8(raw).ok()?;
        let (package, version) = raw.strip_prefix(PRIMARY_PREFIX)?.split_once(KEY_SEPARATOR)?;
        if package.is_empty() || version.is_empty() {
            return None;
        }
        Some(Self::new(package, version))
    }
}

/// Scan prefix covering every version of `package` and nothing else.
pub fn package_prefix(package: &str) -> Vec<u8> {
    format!("{PRIMARY_PREFIX}{package}{KEY_SEPARATOR}").into_bytes()
}

pub fn index_key(sync_key: &SyncKey) -> Vec<u8> {
    format!("{INDEX_PREFIX}{sync_key}").into_bytes()
}
