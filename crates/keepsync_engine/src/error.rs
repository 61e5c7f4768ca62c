//! Error types for the offline engine.

use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the offline engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server operation ran and failed.
    #[error("server error: {0}")]
    Server(String),

    /// The server rejected a write because the id already exists.
    #[error("duplicate id: {0}")]
    DuplicateId(String),

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Mirror, queue or watermark failure.
    #[error("mirror error: {0}")]
    Mirror(#[from] keepsync_core::CoreError),

    /// Authoritative cache failure.
    #[error("cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),

    /// Malformed message.
    #[error("protocol error: {0}")]
    Protocol(#[from] keepsync_codec::CodecError),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::NotConnected => true,
            _ => false,
        }
    }

    /// Returns true for duplicate-id failures, which are expected during
    /// sync and never reported.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            SyncError::DuplicateId(_) | SyncError::Cache(crate::cache::CacheError::DuplicateId { .. })
        )
    }
}
