//! Composer manifest handling for the repository index.
//!
//! This crate owns the two pure transformations of the package pipeline:
//!
//! - **Normalization**: raw `composer.json` bytes fetched from a code host
//!   become a [`VersionRecord`] with the `version` and `dist` fields forced to
//!   the values the repository serves (see [`normalize`]).
//! - **Minification**: an ordered list of manifests for one package becomes
//!   the diff-encoded list understood by Composer 2 clients (see [`minify`]).
//!
//! Neither step performs I/O; storage lives in `comreg-index`.

pub mod error;
mod manifest;
mod minify;
mod normalize;

pub use crate::manifest::{Dist, Manifest, SyncKey, VersionRecord};
pub use crate::minify::{MINIFIED_FORMAT, MinifiedVersions, UNSET, canonical_eq, minify};
pub use crate::normalize::normalize;

/// Version labels starting with this prefix track a branch, not a release tag.
pub const DEV_PREFIX: &str = "dev-";

/// Returns `true` if the version label tracks a branch (`dev-*`).
pub fn is_dev(version: &str) -> bool {
    version.starts_with(DEV_PREFIX)
}
