//! # Adar Store
//!
//! Persistence for an adar node: per-path metadata, coded file content and
//! the pairing trust store.
//!
//! ## Overview
//!
//! Every component that touches local state goes through the [`Storage`]
//! trait: the control channel answers LIST/STATS/CREATE/RENAME/REMOVE from
//! it, the data channel serves READ requests from [`Storage::symbols`] and
//! commits decoded content, and the sync orchestrator reconciles against it.
//! File content is held as a [`SymbolBlob`](adar_core::SymbolBlob): the
//! systematic bytes plus seeded redundancy.
//!
//! ## Key Types
//!
//! - [`Storage`] - Async trait for the path-addressed file tree
//! - [`TrustStore`] - Async trait for persisted pairing fingerprints
//! - [`SqliteStore`] - SQLite-backed implementation of both
//! - [`MemoryStore`] - In-memory implementation for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use adar_core::{now_nanos, RemotePath};
//! use adar_store::{SqliteStore, Storage};
//!
//! async fn example() {
//!     let store = SqliteStore::open("adar.db").unwrap();
//!     let path = RemotePath::new("/notes.txt").unwrap();
//!     store.create(&path, false, now_nanos()).await.unwrap();
//!     store.write(&path, 0, b"hello", now_nanos()).await.unwrap();
//!     assert_eq!(store.read(&path, 0, 5).await.unwrap(), b"hello");
//! }
//! ```

mod content;
pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

#[cfg(test)]
mod suite;

pub use content::MAX_FILE_SIZE;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{Entry, Listing, Storage, SymbolSlice, TrustStore, DEFAULT_REDUNDANCY};
