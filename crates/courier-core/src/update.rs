//! Inbound update model.
//!
//! An [`Update`] is one immutable event received from the chat platform. Its
//! shape is discriminated by [`UpdateKind`]; the serde representation follows
//! the platform's flat JSON layout where the variant is selected by which key
//! is present:
//!
//! ```json
//! { "update_id": 7, "message": { "message_id": 1, "chat": { "id": 42, "type": "private" }, "text": "/start" } }
//! { "update_id": 8, "callback_query": { "id": "cb1", "from": { "id": 5 }, "data": "buy@3" } }
//! ```

use serde::{Deserialize, Serialize};

/// Identifier of a chat. Sessions are keyed by it.
pub type ChatId = i64;

/// Identifier of a platform user.
pub type UserId = i64;

/// Identifier of a message within a chat.
pub type MessageId = i64;

// =============================================================================
// Update
// =============================================================================

/// One inbound event from the chat platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawUpdate", into = "RawUpdate")]
pub struct Update {
    /// Monotonic identifier assigned by the platform.
    pub update_id: i64,
    /// The discriminated payload.
    pub kind: UpdateKind,
}

/// The payload carried by an [`Update`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    /// A new message: command, free text, document or media.
    Message(Message),
    /// A button press on an inline keyboard.
    CallbackQuery(CallbackQuery),
    /// Any update shape the dispatch engine does not route.
    Other,
}

/// Wire layout of an update: at most one payload key is expected.
#[derive(Serialize, Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    callback_query: Option<CallbackQuery>,
}

impl From<RawUpdate> for Update {
    fn from(raw: RawUpdate) -> Self {
        let kind = match (raw.callback_query, raw.message) {
            (Some(query), _) => UpdateKind::CallbackQuery(query),
            (None, Some(message)) => UpdateKind::Message(message),
            (None, None) => UpdateKind::Other,
        };
        Self {
            update_id: raw.update_id,
            kind,
        }
    }
}

impl From<Update> for RawUpdate {
    fn from(update: Update) -> Self {
        let (message, callback_query) = match update.kind {
            UpdateKind::Message(message) => (Some(message), None),
            UpdateKind::CallbackQuery(query) => (None, Some(query)),
            UpdateKind::Other => (None, None),
        };
        Self {
            update_id: update.update_id,
            message,
            callback_query,
        }
    }
}

impl Update {
    /// Creates a message update.
    pub fn message(update_id: i64, message: Message) -> Self {
        Self {
            update_id,
            kind: UpdateKind::Message(message),
        }
    }

    /// Creates a callback-query update.
    pub fn callback(update_id: i64, query: CallbackQuery) -> Self {
        Self {
            update_id,
            kind: UpdateKind::CallbackQuery(query),
        }
    }

    /// Creates an update the engine does not route.
    pub fn other(update_id: i64) -> Self {
        Self {
            update_id,
            kind: UpdateKind::Other,
        }
    }

    /// Short name of the variant, used in log fields.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            UpdateKind::Message(_) => "message",
            UpdateKind::CallbackQuery(_) => "callback_query",
            UpdateKind::Other => "other",
        }
    }

    /// The chat this update belongs to.
    ///
    /// For callback queries this is the chat of the message the button was
    /// attached to; queries from inline messages have no chat.
    pub fn chat_id(&self) -> Option<ChatId> {
        match &self.kind {
            UpdateKind::Message(message) => Some(message.chat.id),
            UpdateKind::CallbackQuery(query) => query.message.as_ref().map(|m| m.chat.id),
            UpdateKind::Other => None,
        }
    }

    /// The user who caused this update.
    pub fn sender_id(&self) -> Option<UserId> {
        match &self.kind {
            UpdateKind::Message(message) => message.from.as_ref().map(|u| u.id),
            UpdateKind::CallbackQuery(query) => Some(query.from.id),
            UpdateKind::Other => None,
        }
    }

    /// The sending user, if the variant carries one.
    pub fn sender(&self) -> Option<&User> {
        match &self.kind {
            UpdateKind::Message(message) => message.from.as_ref(),
            UpdateKind::CallbackQuery(query) => Some(&query.from),
            UpdateKind::Other => None,
        }
    }

    /// The message, for message updates only.
    pub fn as_message(&self) -> Option<&Message> {
        match &self.kind {
            UpdateKind::Message(message) => Some(message),
            _ => None,
        }
    }

    /// The callback query, for callback updates only.
    pub fn as_callback_query(&self) -> Option<&CallbackQuery> {
        match &self.kind {
            UpdateKind::CallbackQuery(query) => Some(query),
            _ => None,
        }
    }

    /// The callback payload, for callback updates only.
    pub fn callback_data(&self) -> Option<&str> {
        self.as_callback_query().and_then(|q| q.data.as_deref())
    }

    /// The text of a message update.
    pub fn text(&self) -> Option<&str> {
        self.as_message().and_then(|m| m.text.as_deref())
    }
}

// =============================================================================
// Message
// =============================================================================

/// A chat message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    /// Unix timestamp of the message.
    #[serde(default)]
    pub date: i64,
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    /// Available sizes of an attached photo, smallest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photo: Vec<PhotoSize>,
}

/// Routing-relevant classification of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageShape {
    Command,
    Text,
    Document,
    Photo,
    Other,
}

impl Message {
    /// Creates an empty message in `chat`.
    pub fn new(message_id: MessageId, chat: Chat) -> Self {
        Self {
            message_id,
            chat,
            ..Default::default()
        }
    }

    /// Sets the message text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Sets the sender.
    pub fn with_from(mut self, user: User) -> Self {
        self.from = Some(user);
        self
    }

    /// Attaches a document.
    pub fn with_document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }

    /// Attaches a photo in the given sizes.
    pub fn with_photo(mut self, sizes: Vec<PhotoSize>) -> Self {
        self.photo = sizes;
        self
    }

    /// Returns `true` if the text is a bot command (starts with `/`).
    pub fn is_command(&self) -> bool {
        self.text
            .as_deref()
            .is_some_and(|t| t.len() > 1 && t.starts_with('/'))
    }

    /// The command name without the leading `/` and without any `@botname` suffix.
    pub fn command(&self) -> Option<&str> {
        if !self.is_command() {
            return None;
        }
        let text = self.text.as_deref()?;
        let token = text[1..].split(char::is_whitespace).next().unwrap_or("");
        token.split('@').next()
    }

    /// Everything after the command token, trimmed. Empty for non-commands.
    pub fn command_arguments(&self) -> &str {
        if !self.is_command() {
            return "";
        }
        self.text
            .as_deref()
            .and_then(|t| t.split_once(char::is_whitespace))
            .map(|(_, rest)| rest.trim())
            .unwrap_or("")
    }

    /// Classifies the message for routing.
    pub fn shape(&self) -> MessageShape {
        if self.is_command() {
            MessageShape::Command
        } else if self.document.is_some() {
            MessageShape::Document
        } else if !self.photo.is_empty() {
            MessageShape::Photo
        } else if self.text.is_some() {
            MessageShape::Text
        } else {
            MessageShape::Other
        }
    }

    /// The largest available photo size.
    pub fn best_photo(&self) -> Option<&PhotoSize> {
        self.photo.last()
    }
}

/// A chat.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(rename = "type", default)]
    pub kind: ChatKind,
}

impl Chat {
    /// A one-to-one chat with a user.
    pub fn private(id: ChatId) -> Self {
        Self {
            id,
            kind: ChatKind::Private,
        }
    }

    /// A group chat.
    pub fn group(id: ChatId) -> Self {
        Self {
            id,
            kind: ChatKind::Group,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    #[default]
    Private,
    Group,
    Supergroup,
    Channel,
}

/// A platform user.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl User {
    pub fn new(id: UserId, first_name: impl Into<String>) -> Self {
        Self {
            id,
            first_name: first_name.into(),
            ..Default::default()
        }
    }

    /// First and last name joined by a space, or just the first name.
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

/// One size of a photo.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

/// A button press on an inline keyboard.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    /// The message the pressed button was attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl CallbackQuery {
    pub fn new(id: impl Into<String>, from: User, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from,
            message: None,
            data: Some(data.into()),
        }
    }

    /// Sets the message the button belongs to.
    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn text_message(text: &str) -> Message {
        Message::new(1, Chat::private(42)).with_text(text)
    }

    #[rstest]
    #[case("/start", Some("start"), "")]
    #[case("/start now", Some("start"), "now")]
    #[case("/buy@shop_bot 3@red", Some("buy"), "3@red")]
    #[case("/echo   hello world  ", Some("echo"), "hello world")]
    #[case("hello", None, "")]
    #[case("/", None, "")]
    fn test_command_parsing(
        #[case] text: &str,
        #[case] command: Option<&str>,
        #[case] arguments: &str,
    ) {
        let message = text_message(text);
        assert_eq!(message.command(), command);
        assert_eq!(message.command_arguments(), arguments);
    }

    #[test]
    fn test_message_shape() {
        assert_eq!(text_message("/start").shape(), MessageShape::Command);
        assert_eq!(text_message("hi").shape(), MessageShape::Text);

        let doc = Message::new(2, Chat::private(1)).with_document(Document {
            file_id: "f".into(),
            ..Default::default()
        });
        assert_eq!(doc.shape(), MessageShape::Document);

        let photo = Message::new(3, Chat::private(1)).with_photo(vec![PhotoSize {
            file_id: "p".into(),
            width: 10,
            height: 10,
            file_size: None,
        }]);
        assert_eq!(photo.shape(), MessageShape::Photo);
        assert_eq!(Message::new(4, Chat::private(1)).shape(), MessageShape::Other);
    }

    #[test]
    fn test_deserialize_message_update() {
        let json = r#"{
            "update_id": 7,
            "message": {
                "message_id": 1,
                "chat": { "id": 42, "type": "group" },
                "from": { "id": 5, "first_name": "Ada" },
                "text": "/start"
            }
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();

        assert_eq!(update.update_id, 7);
        assert_eq!(update.chat_id(), Some(42));
        assert_eq!(update.sender_id(), Some(5));
        assert_eq!(update.text(), Some("/start"));
        assert_eq!(update.as_message().map(|m| m.chat.kind), Some(ChatKind::Group));
    }

    #[test]
    fn test_deserialize_prefers_callback_query() {
        let json = r#"{
            "update_id": 8,
            "message": { "message_id": 1, "chat": { "id": 42 } },
            "callback_query": { "id": "cb1", "from": { "id": 5 }, "data": "buy@3" }
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();

        assert_eq!(update.kind_name(), "callback_query");
        assert_eq!(update.callback_data(), Some("buy@3"));
        // No attached message on the query itself.
        assert_eq!(update.chat_id(), None);
    }

    #[test]
    fn test_unknown_update_is_other() {
        let update: Update =
            serde_json::from_str(r#"{ "update_id": 9, "poll": { "id": "p" } }"#).unwrap();
        assert_eq!(update.kind, UpdateKind::Other);
        assert_eq!(update.chat_id(), None);
        assert_eq!(update.sender_id(), None);
        assert_eq!(update.text(), None);
    }

    #[test]
    fn test_callback_chat_comes_from_attached_message() {
        let query = CallbackQuery::new("cb", User::new(5, "Ada"), "vote@1")
            .with_message(Message::new(10, Chat::group(-100)));
        let update = Update::callback(1, query);

        assert_eq!(update.chat_id(), Some(-100));
        assert_eq!(update.sender_id(), Some(5));
        assert!(update.as_message().is_none());
    }

    #[test]
    fn test_full_name() {
        let mut user = User::new(1, "Ada");
        assert_eq!(user.full_name(), "Ada");
        user.last_name = Some("Lovelace".into());
        assert_eq!(user.full_name(), "Ada Lovelace");
    }
}
