//! Shared fixtures for unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use courier_core::{
    CallbackQuery, Chat, ChatId, Document, Message, MessageId, Transport,
    TransportError, TransportResult, Update, User,
};

use crate::context::DispatchContext;

/// Transport that records everything sent through it.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(ChatId, String)>>,
    answered: Mutex<Vec<(String, Option<String>)>>,
    fail_sends: bool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_sends: true,
            ..Self::default()
        })
    }

    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().clone()
    }

    pub fn answered(&self) -> Vec<(String, Option<String>)> {
        self.answered.lock().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn id(&self) -> &str {
        "recording"
    }

    async fn send_message(&self, chat_id: ChatId, text: &str) -> TransportResult<MessageId> {
        if self.fail_sends {
            return Err(TransportError::SendFailed("rejected".into()));
        }
        let mut sent = self.sent.lock();
        sent.push((chat_id, text.to_string()));
        Ok(sent.len() as MessageId)
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        _show_alert: bool,
    ) -> TransportResult<()> {
        self.answered
            .lock()
            .push((callback_id.to_string(), text.map(str::to_string)));
        Ok(())
    }
}

pub fn user(id: i64) -> User {
    User::new(id, "Tester")
}

pub fn text_update(chat_id: ChatId, text: &str) -> Update {
    let message = Message::new(1, Chat::private(chat_id))
        .with_text(text)
        .with_from(user(chat_id));
    Update::message(1, message)
}

pub fn callback_update(chat_id: ChatId, data: &str) -> Update {
    let anchor = Message::new(1, Chat::private(chat_id));
    let query = CallbackQuery::new("cb-1", user(chat_id), data).with_message(anchor);
    Update::callback(1, query)
}

pub fn document_update(chat_id: ChatId, mime_type: Option<&str>) -> Update {
    let document = Document {
        file_id: "file-1".into(),
        file_name: Some("report.pdf".into()),
        mime_type: mime_type.map(str::to_string),
        file_size: Some(1024),
    };
    let message = Message::new(1, Chat::private(chat_id))
        .with_from(user(chat_id))
        .with_document(document);
    Update::message(1, message)
}

pub fn context(update: Update) -> Arc<DispatchContext> {
    Arc::new(DispatchContext::new(
        update,
        RecordingTransport::new(),
        CancellationToken::new(),
    ))
}
