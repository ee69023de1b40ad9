//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Boxed error returned by lifecycle hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while starting or running the update loop.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// `start` was called while another `start` is still consuming updates.
    #[error("Runtime is already running")]
    AlreadyRunning,

    /// A `before_start` hook failed; the update loop was not entered.
    #[error("Lifecycle hook '{name}' failed: {source}")]
    Hook {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
