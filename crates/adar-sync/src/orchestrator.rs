//! Full-tree replication from one peer.
//!
//! Walks the remote tree breadth-first from the root. Folders missing
//! locally are created; files missing locally, or whose remote copy has
//! a later modification time, are fetched whole and take the remote
//! timestamps. Nothing is ever merged and local-only entries are left
//! alone.

use std::collections::VecDeque;
use std::sync::Arc;

use adar_core::{now_nanos, RemotePath};
use adar_store::Storage;

use crate::error::{Result, SyncError};
use crate::transport::RemoteTree;

/// Result of a replication run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Folders created locally.
    pub created_folders: usize,
    /// Files whose content was pulled.
    pub fetched_files: Vec<RemotePath>,
    /// Paths still failing after the last pass.
    pub failed: Vec<RemotePath>,
    /// Number of passes over the tree.
    pub passes: usize,
}

/// Configuration for replication.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Passes over the tree before giving up on failed fetches.
    pub max_passes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { max_passes: 3 }
    }
}

/// What one call to [`SyncOrchestrator::explore`] did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Explored {
    /// Remote subfolders, to be explored next.
    pub folders: Vec<RemotePath>,
    pub created_folders: usize,
    pub fetched: Vec<RemotePath>,
    pub failed: Vec<RemotePath>,
}

/// Replicates a remote tree into local storage.
pub struct SyncOrchestrator<R: RemoteTree> {
    local: Arc<dyn Storage>,
    remote: R,
    config: SyncConfig,
}

impl<R: RemoteTree> SyncOrchestrator<R> {
    pub fn new(local: Arc<dyn Storage>, remote: R, config: SyncConfig) -> Self {
        Self {
            local,
            remote,
            config,
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Reconcile the direct children of `path`.
    pub async fn explore(&self, path: &RemotePath) -> Result<Explored> {
        let remote = self.remote.list(path).await?;
        let local = self.local.list(path).await?;
        let mut explored = Explored::default();

        for name in &remote.folders {
            let child = path.join(name)?;
            if local.files.contains(name) {
                tracing::warn!("{}: remote folder shadows a local file, skipped", child);
                explored.failed.push(child);
                continue;
            }
            if !local.folders.contains(name) {
                self.local.create(&child, true, now_nanos()).await?;
                explored.created_folders += 1;
            }
            explored.folders.push(child);
        }

        for name in &remote.files {
            let child = path.join(name)?;
            if local.folders.contains(name) {
                tracing::warn!("{}: remote file shadows a local folder, skipped", child);
                explored.failed.push(child);
                continue;
            }
            match self.reconcile_file(&child, local.files.contains(name)).await {
                Ok(true) => explored.fetched.push(child),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("fetching {} from {} failed: {}", child, self.remote.name(), e);
                    explored.failed.push(child);
                }
            }
        }

        Ok(explored)
    }

    /// Pull one file if it is missing locally or the remote copy is newer.
    async fn reconcile_file(&self, path: &RemotePath, exists: bool) -> Result<bool> {
        let remote = self.remote.stat(path).await?;
        if exists {
            let local = self.local.stat(path).await?.metadata;
            if !remote.is_newer_than(&local) {
                return Ok(false);
            }
        } else {
            // A zero-time placeholder stays older than the remote copy, so a
            // failed fetch is retried on the next pass.
            self.local.create(path, false, now_nanos()).await?;
            self.local.set_times(path, 0, 0, 0).await?;
        }

        let bytes = self.remote.read(path, remote.length).await?;
        if bytes.len() as u64 != remote.length {
            return Err(SyncError::InvalidMessage(format!(
                "{}: read {} bytes, expected {}",
                path,
                bytes.len(),
                remote.length
            )));
        }
        self.local.replace(path, &bytes, now_nanos()).await?;
        self.local
            .set_times(path, remote.ctime_ns, remote.mtime_ns, remote.atime_ns)
            .await?;
        tracing::debug!("fetched {} ({} bytes) from {}", path, bytes.len(), self.remote.name());
        Ok(true)
    }

    /// Explore the whole tree, repeating passes while fetches fail.
    pub async fn sync(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        loop {
            report.passes += 1;
            let failed = self.pass(&mut report).await?;
            if failed.is_empty() || report.passes >= self.config.max_passes {
                report.failed = failed;
                break;
            }
            tracing::info!(
                "retrying {} failed paths from {}",
                failed.len(),
                self.remote.name()
            );
        }

        tracing::info!(
            "replicated from {}: {} folders created, {} files fetched, {} failed, {} passes",
            self.remote.name(),
            report.created_folders,
            report.fetched_files.len(),
            report.failed.len(),
            report.passes
        );
        Ok(report)
    }

    async fn pass(&self, report: &mut SyncReport) -> Result<Vec<RemotePath>> {
        let mut failed = Vec::new();
        let mut queue = VecDeque::from([RemotePath::root()]);
        while let Some(dir) = queue.pop_front() {
            match self.explore(&dir).await {
                Ok(explored) => {
                    report.created_folders += explored.created_folders;
                    report.fetched_files.extend(explored.fetched);
                    failed.extend(explored.failed);
                    queue.extend(explored.folders);
                }
                // The peer went away; no point walking the rest.
                Err(e @ (SyncError::PeerNotConnected(_) | SyncError::Cancelled)) => return Err(e),
                Err(e) => {
                    tracing::warn!("exploring {} on {} failed: {}", dir, self.remote.name(), e);
                    failed.push(dir);
                }
            }
        }
        Ok(failed)
    }
}
