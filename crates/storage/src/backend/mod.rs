//! Storage backend traits and implementations.
//!
//! This module defines the [`Backend`] trait, the ordered-map contract every
//! storage engine fulfils, and [`Transaction`], the atomic write unit handed
//! out by [`Backend::begin`].

#[cfg(any(test, feature = "memory"))]
mod memory;
mod sqlite;

#[cfg(any(test, feature = "memory"))]
pub use self::memory::MemoryBackend;
pub use self::sqlite::SqliteBackend;
use crate::error::Result;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;

pub type EntryStream<'a> = Pin<Box<dyn Stream<Item = Result<Entry>> + Send + 'a>>;

/// A single key-value pair returned by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Unified interface for ordered key-value engines.
///
/// Keys live in named namespaces and sort bytewise within a namespace. Reads
/// issued directly on the backend observe committed data only; a scan sees a
/// consistent snapshot and never a partially applied transaction.
///
/// # Writers
/// Writes only happen through a [`Transaction`]. Engines serialize
/// transactions: at most one is open at a time, and [`begin`](Self::begin)
/// waits for the current one to commit or be dropped. Callers must therefore
/// finish any slow work (network fetches, parsing) *before* beginning.
///
/// # Examples
///
/// ```
/// use comreg_storage::{Backend, error::Result};
///
/// async fn rename_key(backend: &dyn Backend, from: &[u8], to: &[u8]) -> Result<bool> {
///     let mut tx = backend.begin().await?;
///     let Some(value) = tx.get("packages", from).await? else {
///         return Ok(false);
///     };
///     tx.delete("packages", from).await?;
///     tx.put("packages", to, &value).await?;
///     tx.commit().await?;
///     Ok(true)
/// }
/// ```
#[async_trait]
pub trait Backend: Send + Sync {
    /// Name of the backend, used for logging only.
    fn name(&self) -> &str;

    /// Look up a single key.
    async fn get(&self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Collect every entry whose key starts with `prefix`, in key order.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`scan_stream()`](Self::scan_stream) into a [`Vec`] before
    /// returning.
    async fn scan(&self, namespace: &str, prefix: &[u8]) -> Result<Vec<Entry>> {
        self.scan_stream(namespace, prefix).try_collect().await
    }

    /// Stream every entry whose key starts with `prefix`, in key order.
    ///
    /// An empty prefix streams the whole namespace.
    fn scan_stream<'a>(&'a self, namespace: &'a str, prefix: &'a [u8]) -> EntryStream<'a>;

    /// Open a write transaction.
    ///
    /// Dropping the transaction without calling [`Transaction::commit`]
    /// discards every staged write.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// An atomic batch of reads and writes.
///
/// Reads inside the transaction observe the transaction's own staged writes.
#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite a key.
    async fn put(&mut self, namespace: &str, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&mut self, namespace: &str, key: &[u8]) -> Result<()>;

    /// Make every staged write visible at once.
    ///
    /// Any further use of the transaction returns
    /// [`TransactionClosed`](crate::error::ErrorKind::TransactionClosed).
    async fn commit(&mut self) -> Result<()>;
}

/// Smallest key greater than every key starting with `prefix`, if one exists.
///
/// `None` means the scan is unbounded above: the prefix is empty or made
/// entirely of `0xFF` bytes.
pub(crate) fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}
