//! Error types for adar core.

use thiserror::Error;

/// Errors that can occur in core computations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("coefficient vector has {got} bits, expected {expected}")]
    CoefficientLength { expected: usize, got: usize },

    #[error("packed coefficients are {got} bytes, expected {expected}")]
    PackedLength { expected: usize, got: usize },

    #[error("decoder has no shared seed to regenerate coefficient {0}")]
    Unseeded(u64),

    #[error("decoding incomplete: rank {rank} of {needed}")]
    DecodeIncomplete { rank: usize, needed: usize },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
