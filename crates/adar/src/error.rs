//! Error types for the node.

use adar_core::{CoreError, PeerId, Version};
use adar_pairing::PairingError;
use adar_store::StoreError;
use adar_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Pairing error.
    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Peer not in the directory.
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// The peer advertises no version we support.
    #[error("no common protocol version with {peer} (offers {offered:?})")]
    IncompatibleVersion { peer: PeerId, offered: Vec<Version> },

    /// The peer declined to pair, or we declined it.
    #[error("pairing with {0} declined")]
    PairingDeclined(PeerId),

    /// None of the peer's addresses accepted a control connection.
    #[error("peer {0} unreachable")]
    Unreachable(PeerId),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
