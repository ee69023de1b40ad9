//! The outbound seam to the chat platform.
//!
//! The dispatch engine never talks to the platform itself. Handlers receive a
//! [`BoxedTransport`] through their context and use it to reply; the runtime
//! uses it once at startup to publish the registered command list and bot
//! profiles, and once at shutdown.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportResult;
use crate::update::{ChatId, MessageId};

/// An entry of the command menu shown by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotCommand {
    /// Command name without the leading `/`.
    pub command: String,
    pub description: String,
}

impl BotCommand {
    pub fn new(command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: description.into(),
        }
    }
}

/// Per-language bot metadata published at startup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotProfile {
    /// IETF language tag the texts apply to, e.g. `en`.
    pub language_code: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub short_description: Option<String>,
}

impl BotProfile {
    /// Returns `true` if the profile carries no text to publish.
    pub fn is_empty(&self) -> bool {
        let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        blank(&self.name) && blank(&self.description) && blank(&self.short_description)
    }
}

/// A send capability towards the chat platform.
///
/// Implementations wrap the platform's API client. Only [`send_message`] and
/// [`answer_callback`] are required; the setup hooks default to no-ops for
/// transports without a command menu or profile concept.
///
/// [`send_message`]: Transport::send_message
/// [`answer_callback`]: Transport::answer_callback
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Identifier of the bot this transport speaks for.
    fn id(&self) -> &str;

    /// Sends a text message to a chat and returns the new message's id.
    async fn send_message(&self, chat_id: ChatId, text: &str) -> TransportResult<MessageId>;

    /// Acknowledges a callback query, optionally showing `text` to the user.
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> TransportResult<()>;

    /// Publishes the command menu, optionally scoped to a language.
    async fn set_commands(
        &self,
        _commands: &[BotCommand],
        _language_code: Option<&str>,
    ) -> TransportResult<()> {
        Ok(())
    }

    /// Publishes name and descriptions for one language.
    async fn set_profile(&self, _profile: &BotProfile) -> TransportResult<()> {
        Ok(())
    }

    /// Called once after the runtime has drained all in-flight dispatches.
    async fn on_shutdown(&self) {}
}

/// A shared transport trait object.
pub type BoxedTransport = Arc<dyn Transport>;
