//! Ordered key-value storage engines.
//!
//! The package index only needs four things from its storage: point lookups,
//! ordered prefix scans, and atomic multi-key transactions of puts and
//! deletes. This crate defines that contract as the [`Backend`] and
//! [`Transaction`] traits and ships two engines:
//!
//! - [`SqliteBackend`](backend::SqliteBackend): persistent, one SQLite file
//!   in WAL mode with embedded migrations.
//! - [`MemoryBackend`](backend::MemoryBackend) (feature `memory`): an ordered
//!   map behind a lock, for tests.
//!
//! Keys are raw bytes and sort bytewise in every engine, so a prefix scan
//! returns the same order regardless of which engine is configured.

pub mod backend;
pub mod error;

pub use crate::backend::{Backend, Entry, Transaction};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn Backend>;
