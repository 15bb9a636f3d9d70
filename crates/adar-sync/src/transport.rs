//! Remote tree abstraction for replication.
//!
//! The orchestrator only needs three things from a peer: directory
//! listings, metadata and file content. [`PeerLink`] answers them over
//! the two channels; [`memory::MemoryRemote`] answers them from a local
//! store for tests.

use std::sync::Arc;

use async_trait::async_trait;

use adar_core::{Metadata, RemotePath};
use adar_store::Listing;

use crate::control::ControlClient;
use crate::data::DataChannel;
use crate::error::{Result, SyncError};
use crate::peers::Peer;

/// Read-only view of a peer's file tree.
#[async_trait]
pub trait RemoteTree: Send + Sync {
    /// Children of a remote directory.
    async fn list(&self, path: &RemotePath) -> Result<Listing>;

    /// Remote metadata of a path.
    async fn stat(&self, path: &RemotePath) -> Result<Metadata>;

    /// Full content of a remote file of `length` bytes.
    async fn read(&self, path: &RemotePath, length: u64) -> Result<Vec<u8>>;

    /// Label for logs.
    fn name(&self) -> &str;
}

/// A connected peer: control for the tree, data channel for content.
pub struct PeerLink {
    peer: Arc<Peer>,
    control: Arc<ControlClient>,
    data: Arc<DataChannel>,
}

impl PeerLink {
    /// Fails unless the peer has a live control connection.
    pub fn new(peer: Arc<Peer>, data: Arc<DataChannel>) -> Result<Self> {
        let control = peer
            .control()
            .ok_or_else(|| SyncError::PeerNotConnected(peer.identity().name.clone()))?;
        Ok(Self {
            peer,
            control,
            data,
        })
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }
}

#[async_trait]
impl RemoteTree for PeerLink {
    async fn list(&self, path: &RemotePath) -> Result<Listing> {
        self.control.list(path).await
    }

    async fn stat(&self, path: &RemotePath) -> Result<Metadata> {
        self.control.stats(path).await
    }

    async fn read(&self, path: &RemotePath, length: u64) -> Result<Vec<u8>> {
        self.data.request_read(&self.peer, path, length).await
    }

    fn name(&self) -> &str {
        &self.peer.identity().name
    }
}

/// A remote tree backed by a local store.
pub mod memory {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use adar_store::Storage;

    /// Serves a [`Storage`] as if it were a peer.
    pub struct MemoryRemote {
        name: String,
        storage: Arc<dyn Storage>,
        fail_next: Mutex<HashSet<RemotePath>>,
    }

    impl MemoryRemote {
        pub fn new(name: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
            Self {
                name: name.into(),
                storage,
                fail_next: Mutex::new(HashSet::new()),
            }
        }

        pub fn storage(&self) -> &Arc<dyn Storage> {
            &self.storage
        }

        /// Make the next read of `path` time out.
        pub fn fail_next_read(&self, path: &RemotePath) {
            self.fail_next
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(path.clone());
        }
    }

    #[async_trait]
    impl RemoteTree for MemoryRemote {
        async fn list(&self, path: &RemotePath) -> Result<Listing> {
            Ok(self.storage.list(path).await?)
        }

        async fn stat(&self, path: &RemotePath) -> Result<Metadata> {
            Ok(self.storage.stat(path).await?.metadata)
        }

        async fn read(&self, path: &RemotePath, length: u64) -> Result<Vec<u8>> {
            let failing = self
                .fail_next
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(path);
            if failing {
                return Err(SyncError::Timeout(format!("reading {}", path)));
            }
            Ok(self.storage.read(path, 0, length).await?)
        }

        fn name(&self) -> &str {
            &self.name
        }
    }
}
