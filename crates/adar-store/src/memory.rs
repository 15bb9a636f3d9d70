//! In-memory implementation of the store traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use adar_core::{Fingerprint, Metadata, PeerId, RemotePath, SymbolBlob};

use crate::content;
use crate::error::{Result, StoreError};
use crate::traits::{Entry, Listing, Storage, SymbolSlice, TrustStore, DEFAULT_REDUNDANCY};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
    redundancy: f64,
}

struct MemoryStoreInner {
    /// Every path, including the root.
    entries: BTreeMap<RemotePath, StoredEntry>,

    /// Pairing fingerprints.
    pairings: HashMap<PeerId, Fingerprint>,
}

struct StoredEntry {
    entry: Entry,
    blob: Option<SymbolBlob>,
}

impl MemoryStore {
    /// Create a store holding only the root directory.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            RemotePath::root(),
            StoredEntry {
                entry: Entry {
                    is_dir: true,
                    metadata: Metadata::new(0, adar_core::now_nanos()),
                },
                blob: None,
            },
        );
        Self {
            inner: RwLock::new(MemoryStoreInner {
                entries,
                pairings: HashMap::new(),
            }),
            redundancy: DEFAULT_REDUNDANCY,
        }
    }

    /// Set the redundancy used when encoding new content.
    pub fn with_redundancy(mut self, redundancy: f64) -> Self {
        self.redundancy = redundancy;
        self
    }

    fn read_inner(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write_inner(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    fn get(&self, path: &RemotePath) -> Result<&StoredEntry> {
        self.entries
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    fn file(&self, path: &RemotePath) -> Result<&StoredEntry> {
        let stored = self.get(path)?;
        if stored.entry.is_dir {
            return Err(StoreError::IsADirectory(path.to_string()));
        }
        Ok(stored)
    }

    fn require_dir(&self, path: &RemotePath) -> Result<()> {
        if self.get(path)?.entry.is_dir {
            Ok(())
        } else {
            Err(StoreError::NotADirectory(path.to_string()))
        }
    }

    /// The path itself followed by everything below it.
    fn subtree(&self, path: &RemotePath) -> Vec<RemotePath> {
        self.entries
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect()
    }

    fn blob(stored: &StoredEntry) -> SymbolBlob {
        stored
            .blob
            .clone()
            .unwrap_or_else(|| SymbolBlob::empty(stored.entry.metadata.seed.unwrap_or(0)))
    }

    fn commit(&mut self, path: &RemotePath, blob: SymbolBlob, now: i64) {
        if let Some(stored) = self.entries.get_mut(path) {
            let metadata = &mut stored.entry.metadata;
            metadata.length = blob.length;
            metadata.seed = Some(blob.seed);
            metadata.touch_modified(now);
            stored.blob = Some(blob);
        }
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn list(&self, path: &RemotePath) -> Result<Listing> {
        let inner = self.read_inner()?;
        inner.require_dir(path)?;

        let mut listing = Listing::default();
        for (child, stored) in &inner.entries {
            if child.parent().as_ref() != Some(path) {
                continue;
            }
            let Some(name) = child.file_name() else {
                continue;
            };
            if stored.entry.is_dir {
                listing.folders.push(name.to_string());
            } else {
                listing.files.push(name.to_string());
            }
        }
        Ok(listing)
    }

    async fn stat(&self, path: &RemotePath) -> Result<Entry> {
        Ok(self.read_inner()?.get(path)?.entry)
    }

    async fn create(&self, path: &RemotePath, is_dir: bool, now: i64) -> Result<()> {
        let mut inner = self.write_inner()?;
        if let Some(existing) = inner.entries.get(path) {
            return if existing.entry.is_dir == is_dir {
                Ok(())
            } else {
                Err(StoreError::AlreadyExists(path.to_string()))
            };
        }
        let parent = path.parent().ok_or(StoreError::Root)?;
        inner.require_dir(&parent)?;

        inner.entries.insert(
            path.clone(),
            StoredEntry {
                entry: Entry {
                    is_dir,
                    metadata: Metadata::new(0, now),
                },
                blob: None,
            },
        );
        Ok(())
    }

    async fn rename(&self, from: &RemotePath, to: &RemotePath) -> Result<()> {
        if from.is_root() || to.is_root() {
            return Err(StoreError::Root);
        }
        let mut inner = self.write_inner()?;
        inner.get(from)?;
        if inner.entries.contains_key(to) {
            return Err(StoreError::AlreadyExists(to.to_string()));
        }
        if to.starts_with(from) {
            return Err(StoreError::InvalidData(format!(
                "cannot move {} below itself",
                from
            )));
        }
        let parent = to.parent().ok_or(StoreError::Root)?;
        inner.require_dir(&parent)?;

        for old in inner.subtree(from) {
            let Some(new) = old.rebase(from, to) else {
                continue;
            };
            if let Some(stored) = inner.entries.remove(&old) {
                inner.entries.insert(new, stored);
            }
        }
        Ok(())
    }

    async fn remove(&self, path: &RemotePath) -> Result<()> {
        if path.is_root() {
            return Err(StoreError::Root);
        }
        let mut inner = self.write_inner()?;
        inner.get(path)?;
        for p in inner.subtree(path) {
            inner.entries.remove(&p);
        }
        Ok(())
    }

    async fn set_times(
        &self,
        path: &RemotePath,
        ctime: i64,
        mtime: i64,
        atime: i64,
    ) -> Result<()> {
        let mut inner = self.write_inner()?;
        let stored = inner
            .entries
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        let metadata = &mut stored.entry.metadata;
        metadata.ctime_ns = ctime;
        metadata.mtime_ns = mtime;
        metadata.atime_ns = atime;
        Ok(())
    }

    async fn read(&self, path: &RemotePath, offset: u64, length: u64) -> Result<Vec<u8>> {
        let inner = self.read_inner()?;
        let stored = inner.file(path)?;
        match &stored.blob {
            Some(blob) => content::range(blob, offset, length),
            None => Ok(Vec::new()),
        }
    }

    async fn write(&self, path: &RemotePath, offset: u64, data: &[u8], now: i64) -> Result<u64> {
        let mut inner = self.write_inner()?;
        let existing = MemoryStoreInner::blob(inner.file(path)?);
        let blob = content::spliced(&existing, offset, data, self.redundancy)?;
        inner.commit(path, blob, now);
        Ok(data.len() as u64)
    }

    async fn replace(&self, path: &RemotePath, data: &[u8], now: i64) -> Result<()> {
        let mut inner = self.write_inner()?;
        let seed = if inner.entries.contains_key(path) {
            inner.file(path)?.entry.metadata.seed
        } else {
            let parent = path.parent().ok_or(StoreError::Root)?;
            inner.require_dir(&parent)?;
            inner.entries.insert(
                path.clone(),
                StoredEntry {
                    entry: Entry {
                        is_dir: false,
                        metadata: Metadata::new(0, now),
                    },
                    blob: None,
                },
            );
            None
        };
        let blob = content::encoded(data, seed, self.redundancy)?;
        inner.commit(path, blob, now);
        Ok(())
    }

    async fn symbols(&self, path: &RemotePath, skip: u64, count: u64) -> Result<SymbolSlice> {
        let inner = self.read_inner()?;
        let blob = MemoryStoreInner::blob(inner.file(path)?);
        Ok(SymbolSlice {
            seed: blob.seed,
            length: blob.length,
            symbols: blob.slice(skip, count).to_vec(),
        })
    }
}

#[async_trait]
impl TrustStore for MemoryStore {
    async fn fingerprint(&self, peer: &PeerId) -> Result<Option<Fingerprint>> {
        Ok(self.read_inner()?.pairings.get(peer).copied())
    }

    async fn record(&self, peer: &PeerId, fingerprint: &Fingerprint) -> Result<bool> {
        let mut inner = self.write_inner()?;
        if inner.pairings.contains_key(peer) {
            return Ok(false);
        }
        inner.pairings.insert(*peer, *fingerprint);
        Ok(true)
    }

    async fn forget(&self, peer: &PeerId) -> Result<bool> {
        Ok(self.write_inner()?.pairings.remove(peer).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite;

    #[tokio::test]
    async fn test_tree_operations() {
        suite::tree_operations(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_content_operations() {
        suite::content_operations(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_rename_and_remove_subtrees() {
        suite::rename_and_remove_subtrees(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_trust_records() {
        suite::trust_records(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_low_redundancy_still_reads_back() {
        let store = MemoryStore::new().with_redundancy(0.0);
        let path = RemotePath::new("/f").unwrap();
        store.create(&path, false, 1).await.unwrap();
        store.write(&path, 0, b"abc", 2).await.unwrap();
        let slice = store.symbols(&path, 0, u64::MAX).await.unwrap();
        assert_eq!(slice.symbols, b"abc");
    }
}
