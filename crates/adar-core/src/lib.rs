//! # Adar Core
//!
//! Pure primitives for the adar storage node: peer identifiers, logical
//! paths, per-path metadata and the network coding engine.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`PeerId`] - Stable identity of a node (UUID)
//! - [`RemotePath`] - Normalised absolute POSIX path shared by all peers
//! - [`Metadata`] - Length, timestamps and coding seed of a path
//! - [`Encoder`] / [`Decoder`] - Systematic random linear coding over GF(2)
//! - [`SymbolBlob`] - The persisted, coded form of a file's content
//!
//! ## Coding
//!
//! Every source symbol is one byte. A coded symbol is the XOR of the source
//! bytes selected by a coefficient bit-vector. Coefficients are regenerated
//! from a shared 64-bit seed, see [`coding`].

pub mod blob;
pub mod coding;
pub mod error;
pub mod metadata;
pub mod types;

pub use blob::SymbolBlob;
pub use coding::{
    random_seed, BitVector, CodedSymbol, CoefficientStream, Decoder, Encoder, UNSEEDED,
};
pub use error::{CoreError, Result};
pub use metadata::{now_nanos, Metadata};
pub use types::{Fingerprint, PeerId, RemotePath, Version, SUPPORTED_VERSIONS};
