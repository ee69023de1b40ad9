//! Error types for the Courier framework.

use thiserror::Error;

use crate::router::HandlerKind;

/// Errors raised while registering handlers.
///
/// These are programming errors surfaced synchronously at setup time; a
/// dispatcher is never built from a registration that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    /// A required argument was empty.
    #[error("argument '{argument}' must not be empty")]
    InvalidArgument {
        /// Name of the offending argument.
        argument: &'static str,
    },

    /// A handler is already registered under the same kind and name.
    #[error("{kind} handler already exists for name: {name}")]
    HandlerAlreadyExists {
        /// The handler kind.
        kind: HandlerKind,
        /// The duplicated name.
        name: String,
    },
}

/// Result type for registration operations.
pub type SetupResult<T> = Result<T, SetupError>;
