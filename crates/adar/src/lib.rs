//! # Adar
//!
//! A peer-to-peer replicated file store node.
//!
//! ## Overview
//!
//! Nodes discover each other on the local network, pair once, and from then
//! on replicate each other's file trees:
//!
//! - **Pairing**: trust on first use, remembered by fingerprint
//! - **Control channel**: TCP requests for handshakes and tree operations
//! - **Data channel**: UDP datagrams of network-coded, encrypted file symbols
//! - **Replication**: a full-tree walk per session, newer remote copies win
//!
//! ## Key Concepts
//!
//! - **Session**: `Discovered → Paired → Connected → KeyAgreed → Syncing → Ready`,
//!   driven from both ends at once.
//! - **Symbol**: one byte of a GF(2) linear combination of a file's bytes.
//!   Any `length` independent symbols recover the file.
//! - **Fan-out**: local writes are pushed to every peer in `Syncing` or `Ready`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use adar::{Node, NodeConfig};
//! use adar::core::RemotePath;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = NodeConfig::load("adar.toml")?;
//!     let node = Node::start(config).await?;
//!
//!     // Discovery reports peers as they appear:
//!     // node.on_peer_discovered(discovered).await;
//!
//!     let path = RemotePath::new("/notes.txt")?;
//!     node.create(&path, false).await?;
//!     node.write(&path, 0, b"hello").await?;
//!
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `adar::core` - Paths, identifiers, coding engine
//! - `adar::store` - Storage and trust store, SQLite
//! - `adar::pairing` - Pairing and channel crypto
//! - `adar::sync` - Channels, sessions and replication

pub mod config;
pub mod error;
pub mod node;
mod session;

// Re-export component crates
pub use adar_core as core;
pub use adar_pairing as pairing;
pub use adar_store as store;
pub use adar_sync as sync;

// Re-export main types for convenience
pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use node::{Node, PeerInfo};

// Re-export commonly used types
pub use adar_core::{PeerId, RemotePath};
pub use adar_pairing::{AcceptAll, AllowList, PairingPolicy, PeerIdentity, RejectAll};
pub use adar_sync::{DiscoveredPeer, SessionState};
