//! # Courier Core
//!
//! Foundation types for the Courier update dispatch engine.
//!
//! - **Updates**: the discriminated inbound event model ([`Update`], [`UpdateKind`], [`Message`])
//! - **Transport**: the narrow outbound seam handlers reply through ([`Transport`])
//! - **Sessions**: per-chat conversation state, its store and per-chat locks
//!   ([`Session`], [`SessionStore`], [`MemorySessionStore`], [`ChatLocks`])
//!
//! The dispatch pipeline itself (context, middleware, router) lives in
//! `courier-framework`; the update loop in `courier-runtime`.

pub mod error;
pub mod session;
pub mod transport;
pub mod update;

pub use error::{SessionError, SessionResult, TransportError, TransportResult};
pub use session::{
    ChatGuard, ChatLocks, MemorySessionStore, Session, SessionStore, SessionStoreExt,
    SessionStoreStats,
};
pub use transport::{BotCommand, BotProfile, BoxedTransport, Transport};
pub use update::{
    CallbackQuery, Chat, ChatId, ChatKind, Document, Message, MessageId, MessageShape, PhotoSize,
    Update, UpdateKind, User, UserId,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::session::{Session, SessionStore, SessionStoreExt};
    pub use super::transport::{BoxedTransport, Transport};
    pub use super::update::{ChatId, Message, Update, UpdateKind};
}
