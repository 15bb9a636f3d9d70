//! Error types for the store module.

use adar_core::CoreError;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Path does not exist.
    #[error("no such path: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("path already exists: {0}")]
    AlreadyExists(String),

    /// Operation needs a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Operation needs a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// The root cannot be removed or renamed.
    #[error("operation not permitted on the root")]
    Root,

    /// Write would grow a file past the supported size.
    #[error("file would exceed {limit} bytes")]
    TooLarge { limit: u64 },

    /// Stored content could not be decoded.
    #[error("content error: {0}")]
    Content(#[from] CoreError),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A lock was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    Poisoned(String),

    /// Blocking task failed to complete.
    #[error("background task failed: {0}")]
    Task(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
