//! Error types for the sync module.

use std::net::IpAddr;

use thiserror::Error;

use crate::peers::SessionState;

/// Errors that can occur on the channels and during replication.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Message validation failed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The remote answered with a bare sentinel.
    #[error("remote reported a protocol error")]
    ProtocolError,

    /// The remote's storage failed the request.
    #[error("remote storage refused the request")]
    Nak,

    /// A frame grew past the size limit.
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store operation failed.
    #[error("store error: {0}")]
    StoreError(#[from] adar_store::StoreError),

    /// Pairing or channel crypto failed.
    #[error("pairing error: {0}")]
    PairingError(#[from] adar_pairing::PairingError),

    /// Core error.
    #[error("core error: {0}")]
    CoreError(#[from] adar_core::CoreError),

    /// No peer in the directory matches an address.
    #[error("unidentified peer at {0}")]
    Unidentified(IpAddr),

    /// Timeout waiting for peer.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Peer is not connected.
    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    /// Session state machine violation.
    #[error("invalid session transition {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// Shutdown was requested.
    #[error("shut down")]
    Cancelled,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
