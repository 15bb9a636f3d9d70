//! Error types for the pairing module.

use thiserror::Error;

/// Errors that can occur during pairing and channel encryption.
#[derive(Debug, Error)]
pub enum PairingError {
    /// Public key material could not be parsed.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Encryption error.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Authentication tag did not verify.
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// The peer shares no protocol version with us.
    #[error("no common protocol version")]
    IncompatibleVersions,

    /// Trust store error.
    #[error("trust store error: {0}")]
    Store(#[from] adar_store::StoreError),

    /// Core error.
    #[error("core error: {0}")]
    CoreError(#[from] adar_core::CoreError),
}

/// Result type for pairing operations.
pub type Result<T> = std::result::Result<T, PairingError>;
