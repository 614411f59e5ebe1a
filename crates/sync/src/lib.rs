//! Reconciliation of upstream refs into the version index.
//!
//! Providers turn code-host state into [`SyncEvent`]s, either all at once
//! (a full resync) or one at a time (a webhook delivery). The
//! [`Synchronizer`] normalizes each event and applies it to the
//! [`VersionStore`](comreg_index::VersionStore). Both paths derive version
//! labels and sync keys from the same [`GitRef`], so an entry created by a
//! resync can be removed by a later webhook and vice versa.
//!
//! ```no_run
//! use comreg_sync::{Providers, Synchronizer};
//!
//! async fn startup(synchronizer: &Synchronizer, providers: &Providers) {
//!     for handle in synchronizer.spawn_startup_resyncs(providers) {
//!         let _ = handle.await;
//!     }
//! }
//! ```

mod custom;
pub mod error;
mod event;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod provider;
mod registry;
mod synchronizer;
pub mod webhook;

pub use crate::custom::{CustomProvider, custom_sync_key};
pub use crate::event::{GitRef, RefKind, SyncEvent};
pub use crate::provider::{EventStream, Provider, RefProvider, RefSource, RemoteRef};
pub use crate::registry::{ProviderHandle, Providers};
pub use crate::synchronizer::{Applied, ResyncSummary, Synchronizer};
