//! Error types for the keepsync server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the keepsync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No method with this name is registered.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// A method with this name is already registered or reserved.
    #[error("method already registered: {0}")]
    MethodExists(String),

    /// The method requires an authenticated caller.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The document source failed.
    #[error("document source error: {0}")]
    Source(String),

    /// Malformed message.
    #[error("protocol error: {0}")]
    Protocol(#[from] keepsync_codec::CodecError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if the caller is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::UnknownMethod(_)
                | ServerError::NotAuthenticated
                | ServerError::Protocol(_)
        )
    }

    /// Returns true if the server is at fault.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::Source(_) | ServerError::Internal(_) | ServerError::MethodExists(_)
        )
    }
}
