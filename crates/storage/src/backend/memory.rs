//! In-memory storage backend for testing.

use super::{EntryStream, Transaction};
use crate::Backend;
use crate::backend::Entry;
use crate::error::{ErrorKind, Result};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

type Key = (String, Vec<u8>);
type Entries = BTreeMap<Key, Vec<u8>>;

/// In-memory storage backend for testing.
///
/// Entries are stored in a [`BTreeMap`] behind a [`RwLock`]: scans hold the
/// read lock while taking their snapshot, and a [`Transaction`] holds the
/// write lock from [`begin`](Backend::begin) until it commits or is dropped.
pub struct MemoryBackend {
    name: String,
    entries: Arc<RwLock<Entries>>,
    reject_writes: bool,
}

impl MemoryBackend {
    /// Change the name of the memory backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// A backend whose every [`begin`](Backend::begin) fails, for exercising
    /// storage-failure paths in callers.
    pub fn rejecting_writes() -> Self {
        Self { reject_writes: true, ..Self::default() }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            name: "memory".to_string(),
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            reject_writes: false,
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let guard = self.entries.read().await;
        Ok(guard.get(&(namespace.to_string(), key.to_vec())).cloned())
    }

    fn scan_stream<'a>(&'a self, namespace: &'a str, prefix: &'a [u8]) -> EntryStream<'a> {
        Box::pin(stream! {
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let entries: Vec<Entry> = {
                let guard = self.entries.read().await;
                guard
                    .range((namespace.to_string(), prefix.to_vec())..)
                    .take_while(|((ns, key), _)| ns == namespace && key.starts_with(prefix))
                    .map(|((_, key), value)| Entry { key: key.clone(), value: value.clone() })
                    .collect()
            };
            for entry in entries {
                yield Ok(entry);
            }
        })
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        if self.reject_writes {
            exn::bail!(ErrorKind::Unavailable(format!("{} is rejecting writes", self.name)));
        }
        let guard = Arc::clone(&self.entries).write_owned().await;
        Ok(Box::new(MemoryTransaction { guard: Some(guard), staged: BTreeMap::new() }))
    }
}

/// Staged writes on top of an exclusively held map.
///
/// `None` in `staged` marks a deletion.
struct MemoryTransaction {
    guard: Option<OwnedRwLockWriteGuard<Entries>>,
    staged: BTreeMap<Key, Option<Vec<u8>>>,
}

impl MemoryTransaction {
    fn entries(&self) -> Result<&Entries> {
        match &self.guard {
            Some(guard) => Ok(guard),
            None => exn::bail!(ErrorKind::TransactionClosed),
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key = (namespace.to_string(), key.to_vec());
        let entries = self.entries()?;
        match self.staged.get(&key) {
            Some(staged) => Ok(staged.clone()),
            None => Ok(entries.get(&key).cloned()),
        }
    }

    async fn put(&mut self, namespace: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries()?;
        self.staged.insert((namespace.to_string(), key.to_vec()), Some(value.to_vec()));
        Ok(())
    }

    async fn delete(&mut self, namespace: &str, key: &[u8]) -> Result<()> {
        self.entries()?;
        self.staged.insert((namespace.to_string(), key.to_vec()), None);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let Some(mut guard) = self.guard.take() else {
            exn::bail!(ErrorKind::TransactionClosed);
        };
        for (key, value) in std::mem::take(&mut self.staged) {
            match value {
                Some(value) => guard.insert(key, value),
                None => guard.remove(&key),
            };
        }
        Ok(())
    }
}
