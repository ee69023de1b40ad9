//! # Courier
//!
//! An update dispatch engine for chat bots.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────────────────────────────────────┐
//! │   Runtime   │────▶│ Session ─▶ Router ─▶ custom middleware ─▶ Handler │──▶ Transport
//! │  (updates)  │     │          (one task per update, chat-serialised)  │
//! └─────────────┘     └──────────────────────────────────────────────────┘
//! ```
//!
//! - **Runtime**: pulls updates from a stream, bounds concurrency, drains on shutdown
//! - **Session**: loads the chat's conversation state and writes it back afterwards
//! - **Router**: picks a handler by callback action, command, document type or state
//! - **Handlers**: async functions of the dispatch context
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! async fn start(ctx: Arc<DispatchContext>) -> String {
//!     ctx.set_state("awaiting_name");
//!     "What is your name?".to_string()
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut builder = Dispatcher::builder(transport);
//!     builder.register_command("start", "Begin", start)?;
//!
//!     let runtime = CourierRuntime::builder().build(builder.build())?;
//!     runtime.run(updates).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default), `yaml-config`, `json-config`: configuration file formats
//! - `json-log`: JSON log output

pub use courier_core as core;
pub use courier_framework as framework;
pub use courier_runtime as runtime;

/// Commonly used types for building bots.
///
/// ```rust,ignore
/// use courier::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Runtime - main entry point
    pub use courier_runtime::{CancellationToken, CourierConfig, CourierRuntime, RuntimeError};

    // Dispatch pipeline
    pub use courier_framework::{
        DispatchContext, Dispatcher, DispatcherBuilder, Handler, HandlerKind, Middleware, Next,
        SetupError,
    };

    // Data model and seams
    pub use courier_core::{
        BotCommand, BotProfile, BoxedTransport, CallbackQuery, Chat, ChatId, Message, Session,
        SessionStore, Transport, TransportError, TransportResult, Update, UpdateKind, User,
    };

    pub use courier_runtime::prelude::*;
}
