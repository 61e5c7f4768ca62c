//! Error types for keepsync core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in keepsync core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage engine error.
    #[error("storage error: {0}")]
    Storage(#[from] keepsync_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] keepsync_codec::CodecError),

    /// A document is not a map or has no usable `_id`.
    #[error("invalid document: {message}")]
    InvalidDocument {
        /// Description of the problem.
        message: String,
    },

    /// The entity type has no retention policy.
    #[error("entity type not retained: {name}")]
    UnknownEntityType {
        /// Name of the entity type.
        name: String,
    },

    /// `keep` was called twice for the same entity type.
    #[error("entity type already kept: {name}")]
    AlreadyKept {
        /// Name of the entity type.
        name: String,
    },

    /// A persisted queue entry could not be decoded.
    #[error("corrupted queue entry {sequence_id}: {message}")]
    CorruptedQueueEntry {
        /// Sequence id of the entry.
        sequence_id: u64,
        /// Description of the problem.
        message: String,
    },

    /// A corrective operation kept failing.
    #[error("{operation} failed after {attempts} attempts: {message}")]
    RetryExhausted {
        /// What was being attempted.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last error observed.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Creates an unknown entity type error.
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownEntityType { name: name.into() }
    }
}
