//! # Adar Sync
//!
//! Peer sessions, the two wire channels, and tree replication.
//!
//! ## Overview
//!
//! Every peer pair talks over two channels:
//!
//! - a **control channel** (TCP): newline-terminated requests with
//!   unit-separator delimited arguments, one in flight per connection,
//!   used for pairing, handshakes and tree operations;
//! - a **data channel** (UDP): one datagram per frame, carrying coded
//!   file symbols sealed with the key both sides derived during KEY.
//!
//! The [`PeerDirectory`] owns every [`Peer`] and its [`SessionState`].
//! Channel workers find peers by source address and wait on per-peer
//! notifications instead of polling.
//!
//! ## Session Flow
//!
//! ```text
//! Node A                                Node B
//!   |-------- PAIR versions ------------->|   (unless already trusted)
//!   |<------- 1 --------------------------|
//!   |-------- CONNECT versions ---------->|
//!   |<------- negotiated version ---------|
//!   |-------- KEY public ---------------->|
//!   |<------- public ---------------------|
//!   |-------- SYNC ---------------------->|   (B waits for its side)
//!   |<------- 1 --------------------------|
//!   |== LIST / STATS / READ -> DATA =====>|   (replication)
//!   |-------- READY --------------------->|   (B waits for its own sync)
//!   |<------- 1 --------------------------|
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use adar_store::MemoryStore;
//! use adar_sync::{memory::MemoryRemote, SyncConfig, SyncOrchestrator};
//!
//! async fn example() -> adar_sync::Result<()> {
//!     let local = Arc::new(MemoryStore::new());
//!     let remote = MemoryRemote::new("peer", Arc::new(MemoryStore::new()));
//!     let sync = SyncOrchestrator::new(local, remote, SyncConfig::default());
//!     let report = sync.sync().await?;
//!     println!("fetched {} files", report.fetched_files.len());
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod control;
pub mod data;
pub mod datagram;
pub mod error;
pub mod frame;
pub mod messages;
pub mod orchestrator;
pub mod peers;
pub mod shutdown;
pub mod transport;

pub use context::{ChannelContext, ChannelSettings};
pub use control::{ControlClient, ControlServer};
pub use data::{DataChannel, SymbolRun};
pub use datagram::{DataFrame, Payload, PayloadKind, MAX_DATAGRAM};
pub use error::{Result, SyncError};
pub use frame::FrameBuffer;
pub use messages::{CommandCode, Request, Response, MAX_FRAME, NAK, SENTINEL, SEPARATOR};
pub use orchestrator::{Explored, SyncConfig, SyncOrchestrator, SyncReport};
pub use peers::{DiscoveredPeer, Peer, PeerDirectory, PeerSession, SessionState};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use transport::{memory, PeerLink, RemoteTree};
