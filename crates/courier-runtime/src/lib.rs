//! Courier Runtime - the application loop around a Courier [`Dispatcher`].
//!
//! This crate provides:
//! - The update loop (`CourierRuntime`): per-chat ordered, bounded concurrent
//!   dispatch, cancellation, graceful drain and lifecycle hooks
//! - One-time transport setup (command menu and bot profiles)
//! - Layered configuration loading (`config`)
//! - Logging initialisation (`logging`)
//!
//! ```ignore
//! use courier_runtime::CourierRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let dispatcher = build_dispatcher(transport)?;
//!     let runtime = CourierRuntime::builder().build(dispatcher)?;
//!
//!     // Run until the stream ends or Ctrl+C
//!     runtime.run(updates).await?;
//!     Ok(())
//! }
//! ```
//!
//! [`Dispatcher`]: courier_framework::Dispatcher

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
mod scheduler;

pub use config::{ConfigError, ConfigLoader, ConfigResult, CourierConfig, validate_config};
pub use error::{BoxError, RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{CourierRuntime, RuntimeBuilder, wait_for_shutdown};
pub use tokio_util::sync::CancellationToken;

// Re-export tracing for use by bot code
pub use tracing;
pub use tracing_subscriber;

/// Logging macros and span helpers.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
