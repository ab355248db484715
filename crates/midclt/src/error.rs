//! Client error types.

use std::fmt;

use midclt_wire::{CodecError, RemoteErrorPayload};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::config::ConfigError;

/// A specialized `Result` type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// The opening negotiation did not yield a session.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Credentials were rejected or the login exchange failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The server answered the call with a structured error.
    #[error("Remote error: {0}")]
    Remote(RemoteError),

    /// Dial, write or read failure on the WebSocket.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The caller's context was cancelled.
    #[error("Call cancelled")]
    Cancelled,

    /// The caller's deadline passed before a reply arrived.
    #[error("Call deadline exceeded")]
    DeadlineExceeded,

    /// The client is shutting down or already closed.
    #[error("Client is closed")]
    Closed,

    /// A frame or result could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid client configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A job finished in a failed or aborted state.
    #[error("Job {id} failed: {message}")]
    Job {
        /// Job identifier
        id: i64,
        /// Failure description reported by the job
        message: String,
    },
}

impl ClientError {
    /// True for caller-side cancellation or deadline expiry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ClientError::Cancelled | ClientError::DeadlineExceeded)
    }

    /// True when the server returned a structured error.
    pub fn is_remote(&self) -> bool {
        matches!(self, ClientError::Remote(_))
    }

    /// True when the client was closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, ClientError::Closed)
    }

    /// The remote error payload, if this is a [`ClientError::Remote`].
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            ClientError::Remote(remote) => Some(remote),
            _ => None,
        }
    }
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<tungstenite::Error> for ClientError {
    fn from(err: tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Structured error returned by the server for one call.
///
/// Carries whichever of message, code, reason and type the server sent,
/// unmodified. Never retried automatically.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// Method that failed
    pub method: String,
    /// Payload as received
    pub payload: RemoteErrorPayload,
}

impl RemoteError {
    /// Human readable message, if present
    pub fn message(&self) -> Option<&str> {
        self.payload.message.as_deref()
    }

    /// Numeric error code, if present
    pub fn code(&self) -> Option<i64> {
        self.payload.code
    }

    /// Failure reason, if present
    pub fn reason(&self) -> Option<&str> {
        self.payload.reason.as_deref()
    }

    /// Error class, if present
    pub fn error_type(&self) -> Option<&str> {
        self.payload.error_type.as_deref()
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.method, self.payload)
    }
}
