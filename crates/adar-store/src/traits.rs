//! Storage and trust-store traits.
//!
//! Both traits are async so the SQLite backend can move its work onto the
//! blocking pool. Paths are always normalised [`RemotePath`]s and the root
//! directory always exists.

use async_trait::async_trait;

use adar_core::{Fingerprint, Metadata, PeerId, RemotePath};

use crate::error::Result;

/// Redundant symbols stored per source symbol unless configured otherwise.
pub const DEFAULT_REDUNDANCY: f64 = 1.0;

/// A stored path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub is_dir: bool,
    pub metadata: Metadata,
}

/// Child names of a directory, each side sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub folders: Vec<String>,
    pub files: Vec<String>,
}

impl Listing {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }
}

/// A run of stored coded symbols, served to data-channel readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolSlice {
    pub seed: u64,
    /// Source length of the file, which is also the symbol count needed.
    pub length: u64,
    pub symbols: Vec<u8>,
}

/// The path-addressed file tree of a node.
#[async_trait]
pub trait Storage: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Tree
    // ─────────────────────────────────────────────────────────────────────────

    /// Children of a directory.
    async fn list(&self, path: &RemotePath) -> Result<Listing>;

    /// Kind and metadata of a path.
    async fn stat(&self, path: &RemotePath) -> Result<Entry>;

    /// Create a file or directory under an existing directory.
    ///
    /// Creating a path that already exists with the same kind is a no-op.
    async fn create(&self, path: &RemotePath, is_dir: bool, now: i64) -> Result<()>;

    /// Move a path and everything below it.
    async fn rename(&self, from: &RemotePath, to: &RemotePath) -> Result<()>;

    /// Delete a path and everything below it.
    async fn remove(&self, path: &RemotePath) -> Result<()>;

    /// Overwrite the three timestamps of a path.
    async fn set_times(&self, path: &RemotePath, ctime: i64, mtime: i64, atime: i64)
        -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Content
    // ─────────────────────────────────────────────────────────────────────────

    /// Up to `length` bytes starting at `offset`.
    async fn read(&self, path: &RemotePath, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// Write `data` at `offset`, zero-filling any gap past the end.
    ///
    /// Returns the number of bytes written.
    async fn write(&self, path: &RemotePath, offset: u64, data: &[u8], now: i64) -> Result<u64>;

    /// Replace the whole content of a file, creating it if absent.
    async fn replace(&self, path: &RemotePath, data: &[u8], now: i64) -> Result<()>;

    /// Stored symbols `[skip, skip + count)` of a file.
    async fn symbols(&self, path: &RemotePath, skip: u64, count: u64) -> Result<SymbolSlice>;
}

/// Persisted pairing fingerprints.
#[async_trait]
pub trait TrustStore: Send + Sync {
    /// The recorded fingerprint for a peer.
    async fn fingerprint(&self, peer: &PeerId) -> Result<Option<Fingerprint>>;

    /// Record a fingerprint if none exists for the peer.
    ///
    /// Returns `true` if it was written.
    async fn record(&self, peer: &PeerId, fingerprint: &Fingerprint) -> Result<bool>;

    /// Drop a peer's record. Returns `true` if one existed.
    async fn forget(&self, peer: &PeerId) -> Result<bool>;
}
