//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A persisted store file could not be parsed.
    #[error("store '{store}' corrupted: {message}")]
    Corrupted {
        /// Name of the store.
        store: String,
        /// Description of the corruption.
        message: String,
    },

    /// Store names must be usable as file names.
    #[error("invalid store name: {0:?}")]
    InvalidStoreName(String),

    /// The auto-increment key space of a store is exhausted.
    #[error("sequence exhausted for store '{0}'")]
    SequenceExhausted(String),

    /// The engine refused the operation (used by fault-injecting wrappers).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
