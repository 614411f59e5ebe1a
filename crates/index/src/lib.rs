//! The persistent package version index.
//!
//! [`VersionStore`] keeps one manifest per `(package, version)` plus a
//! reverse index from [`SyncKey`](comreg_manifest::SyncKey) to the entry it
//! produced, so a deleted upstream ref can be removed without knowing which
//! version label it was stored under. See [`keys`] for the exact layout.
//!
//! # Guarantees
//! - [`upsert`](VersionStore::upsert) is idempotent and last-write-wins.
//! - [`remove`](VersionStore::remove) of an unknown key succeeds and changes
//!   nothing.
//! - For any package, `list_versions(p, true)` and `list_versions(p, false)`
//!   partition its versions by the `dev-` prefix.

pub mod error;
pub mod keys;
mod store;

pub use crate::keys::PrimaryKey;
pub use crate::store::VersionStore;
