use comreg_index::VersionStore;
use comreg_manifest::MinifiedVersions;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// Where clients fetch a single package's versions; `%package%` is
/// substituted by the client.
pub const METADATA_URL_TEMPLATE: &str = "/p/%package%/versions.json";

/// Identifier suffix asking for branch-tracked (`dev-*`) versions.
pub const DEV_SUFFIX: &str = "~dev";

/// Body of `packages.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIndex {
    #[serde(rename = "metadata-url")]
    pub metadata_url: String,
    #[serde(rename = "available-packages")]
    pub available_packages: Vec<String>,
}

/// Split a `~dev` suffix off a package identifier.
///
/// Returns the bare package name and whether dev versions were requested.
pub fn split_dev_suffix(identifier: &str) -> (&str, bool) {
    match identifier.strip_suffix(DEV_SUFFIX) {
        Some(package) => (package, true),
        None => (identifier, false),
    }
}

/// Answers the two read endpoints of the repository from the version index.
///
/// Holds no state of its own; every call reads committed index data.
#[derive(Clone)]
pub struct Catalog {
    store: VersionStore,
}

impl Catalog {
    pub fn new(store: VersionStore) -> Self {
        Self { store }
    }

    /// Every stored package, sorted.
    pub async fn get_catalog(&self) -> Result<PackageIndex> {
        self.get_catalog_filtered(|_| true).await
    }

    /// Like [`get_catalog`](Self::get_catalog), listing only the packages
    /// `visible` accepts.
    #[instrument(skip_all)]
    pub async fn get_catalog_filtered<F>(&self, visible: F) -> Result<PackageIndex>
    where
        F: Fn(&str) -> bool,
    {
        let names = from_index(self.store.list_package_names().await)?;
        let available_packages: Vec<String> = names.into_iter().filter(|name| visible(name)).collect();
        tracing::debug!(packages = available_packages.len(), "catalog listed");
        Ok(PackageIndex { metadata_url: METADATA_URL_TEMPLATE.to_string(), available_packages })
    }

    /// Minified versions of one package.
    ///
    /// A `~dev` suffix on `identifier` is stripped and forces `dev`. An
    /// unknown package yields an envelope with an empty list.
    #[instrument(skip(self))]
    pub async fn get_package_versions(&self, identifier: &str, dev: bool) -> Result<MinifiedVersions> {
        let (package, forced) = split_dev_suffix(identifier);
        let dev = dev || forced;
        let versions = from_index(self.store.list_versions(package, dev).await)?;
        tracing::debug!(package, dev, versions = versions.len(), "versions listed");
        Ok(MinifiedVersions::new(package, versions))
    }
}

fn from_index<T>(result: comreg_index::error::Result<T>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) => {
            let kind = if e.is_retryable() { ErrorKind::Unavailable } else { ErrorKind::Corrupt };
            Err(e).or_raise(move || kind)
        },
    }
}
