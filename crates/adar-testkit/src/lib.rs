//! # Adar Testkit
//!
//! Testing utilities for adar.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Wire vectors**: Byte-exact control-channel encodings
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Temporary stores, the reference remote tree, loopback node pairs
//!
//! ## Wire Vectors
//!
//! ```rust
//! use adar_testkit::vectors::verify_all_vectors;
//!
//! assert!(verify_all_vectors().is_empty());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use adar_testkit::generators::{buffer, seed};
//!
//! proptest! {
//!     #[test]
//!     fn blob_round_trip(data in buffer(512), seed in seed()) {
//!         // ...
//!     }
//! }
//! ```
//!
//! ## Loopback Nodes
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use adar_store::MemoryStore;
//! use adar_testkit::fixtures::NodePair;
//!
//! async fn example() {
//!     let pair = NodePair::start(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new())).await;
//!     pair.introduce().await;
//!     assert!(pair.wait_ready(Duration::from_secs(10)).await);
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{eventually, populate_remote_tree, NodePair, TempStore};
pub use vectors::{request_vectors, response_vectors, verify_all_vectors};
