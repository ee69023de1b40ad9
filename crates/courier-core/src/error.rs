//! Error types shared by the Courier crates.
//!
//! Framework-level errors (registration failures) live in `courier-framework`,
//! lifecycle errors in `courier-runtime`.

use thiserror::Error;

use crate::update::ChatId;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors surfaced by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The platform rejected or failed to deliver a request.
    #[error("failed to send request: {0}")]
    SendFailed(String),

    /// The update being answered carries no chat to reply to.
    #[error("update has no chat to reply to")]
    NoChat,

    /// The update being answered is not a callback query.
    #[error("update is not a callback query")]
    NotCallback,

    /// The transport is not connected.
    #[error("transport is not connected")]
    NotConnected,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Session Errors
// =============================================================================

/// Errors returned by a [`SessionStore`](crate::session::SessionStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A write targeted a chat that was never initialised through `get_or_create`.
    ///
    /// This is a contract violation by the caller, not a transient fault.
    #[error("session not found for chat: {0}")]
    NotFound(ChatId),

    /// The backing store failed. Never produced by the in-memory store.
    #[error("session backend error: {0}")]
    Backend(String),

    /// A value could not be converted to or from the session data bag.
    #[error("session value conversion failed: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
