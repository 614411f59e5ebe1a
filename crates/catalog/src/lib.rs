//! Read side of the package repository.
//!
//! [`Catalog`] serves the two documents Composer 2 clients fetch:
//!
//! - `packages.json`: every available package plus the URL template for
//!   per-package metadata ([`PackageIndex`]).
//! - `p/{vendor}/{name}/versions.json` (and its `~dev` variant): one package's
//!   versions in the minified encoding
//!   ([`MinifiedVersions`](comreg_manifest::MinifiedVersions)).
//!
//! Authentication and per-user visibility happen before these calls; pass a
//! predicate to [`Catalog::get_catalog_filtered`] to hide packages.

mod catalog;
pub mod error;

pub use crate::catalog::{Catalog, DEV_SUFFIX, METADATA_URL_TEMPLATE, PackageIndex, split_dev_suffix};
