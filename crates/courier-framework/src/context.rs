//! Per-update dispatch context.
//!
//! One [`DispatchContext`] is created for every inbound update and shared as
//! an `Arc` by every middleware layer and the handler that process it. All
//! mutable slots use interior mutability, so layers hand the same context down
//! the chain and observe each other's writes:
//!
//! - the **session** slot is filled by the session middleware before the
//!   router runs and written back to the store after the chain unwinds;
//! - the **params** and **handler** slots are filled by the router middleware;
//! - the **request bag** is free for any layer to use.
//!
//! The context lives for exactly one dispatch.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use courier_core::{
    BoxedTransport, ChatId, MessageId, Session, SessionError, SessionResult, TransportError,
    TransportResult, Update, UserId,
};

use crate::handler::BoxedHandler;
use crate::router::RouteMatch;

type DataBag = HashMap<String, Box<dyn Any + Send + Sync>>;

/// The mutable carrier of one update through the middleware chain.
pub struct DispatchContext {
    request_id: Uuid,
    update: Update,
    transport: BoxedTransport,
    cancel: CancellationToken,
    fallback_reply: Option<Arc<str>>,
    session: Mutex<Option<Session>>,
    params: Mutex<Vec<String>>,
    data: Mutex<DataBag>,
    handler: Mutex<Option<BoxedHandler>>,
    route: Mutex<Option<RouteMatch>>,
}

impl DispatchContext {
    /// Creates a context for `update` with a fresh request id.
    ///
    /// `cancel` should be a child of the runtime's root token so handlers can
    /// observe shutdown cooperatively.
    pub fn new(update: Update, transport: BoxedTransport, cancel: CancellationToken) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            update,
            transport,
            cancel,
            fallback_reply: None,
            session: Mutex::new(None),
            params: Mutex::new(Vec::new()),
            data: Mutex::new(HashMap::new()),
            handler: Mutex::new(None),
            route: Mutex::new(None),
        }
    }

    /// Sets the text sent to the chat when a handler fails.
    pub fn with_fallback_reply(mut self, text: Option<Arc<str>>) -> Self {
        self.fallback_reply = text;
        self
    }

    // ─── Identity ─────────────────────────────────────────────────────────────

    /// Identifier attached to every log line of this dispatch.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn update(&self) -> &Update {
        &self.update
    }

    pub fn transport(&self) -> &BoxedTransport {
        &self.transport
    }

    /// The dispatch's cancellation scope.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `true` once the runtime is shutting down.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn fallback_reply(&self) -> Option<&str> {
        self.fallback_reply.as_deref()
    }

    // ─── Derived accessors (fail softly) ──────────────────────────────────────

    pub fn chat_id(&self) -> Option<ChatId> {
        self.update.chat_id()
    }

    pub fn sender_id(&self) -> Option<UserId> {
        self.update.sender_id()
    }

    /// Message text, or `""` for updates without one.
    pub fn text(&self) -> &str {
        self.update.text().unwrap_or("")
    }

    /// Command name, or `""` unless the update is a command message.
    pub fn command(&self) -> &str {
        self.update
            .as_message()
            .and_then(|m| m.command())
            .unwrap_or("")
    }

    /// Raw command argument string, or `""`.
    pub fn command_arguments(&self) -> &str {
        self.update
            .as_message()
            .map(|m| m.command_arguments())
            .unwrap_or("")
    }

    /// Callback payload, or `""` unless the update is a callback query.
    pub fn callback_data(&self) -> &str {
        self.update.callback_data().unwrap_or("")
    }

    // ─── Session ──────────────────────────────────────────────────────────────

    /// A copy of the active session, if one was loaded.
    pub fn session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    pub fn has_session(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Installs the session for this dispatch.
    pub fn set_session(&self, session: Session) {
        *self.session.lock() = Some(session);
    }

    /// Removes the session from the context.
    pub fn take_session(&self) -> Option<Session> {
        self.session.lock().take()
    }

    /// Runs `f` against the active session, if any.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.session.lock().as_mut().map(f)
    }

    /// The session's state name, or `""` without a session.
    pub fn state(&self) -> String {
        self.with_session(|s| s.state().to_string())
            .unwrap_or_default()
    }

    /// Moves the conversation to `state`. Returns `false` without a session.
    pub fn set_state(&self, state: impl Into<String>) -> bool {
        let state = state.into();
        self.with_session(|s| s.set_state(state)).is_some()
    }

    /// Resets the conversation state. Returns `false` without a session.
    pub fn clear_state(&self) -> bool {
        self.with_session(Session::clear_state).is_some()
    }

    /// Reads a typed value from the session bag.
    pub fn session_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.session.lock().as_ref().and_then(|s| s.get(key))
    }

    /// Writes a typed value to the session bag.
    pub fn session_set<T: Serialize>(&self, key: impl Into<String>, value: T) -> SessionResult<()> {
        let mut slot = self.session.lock();
        match slot.as_mut() {
            Some(session) => session.set(key, value),
            None => Err(SessionError::NotFound(self.chat_id().unwrap_or_default())),
        }
    }

    /// Empties the session bag, keeping the state.
    pub fn clear_session_data(&self) -> bool {
        self.with_session(Session::clear_data).is_some()
    }

    // ─── Routing params ───────────────────────────────────────────────────────

    /// Tokens extracted from the command arguments or callback payload.
    pub fn params(&self) -> Vec<String> {
        self.params.lock().clone()
    }

    pub fn param(&self, index: usize) -> Option<String> {
        self.params.lock().get(index).cloned()
    }

    pub fn set_params(&self, params: Vec<String>) {
        *self.params.lock() = params;
    }

    // ─── Request bag ──────────────────────────────────────────────────────────

    /// Stores a value under `key`, replacing any previous value of any type.
    pub fn set_data<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.data.lock().insert(key.into(), Box::new(value));
    }

    /// Returns a clone of the value under `key` if it has type `T`.
    pub fn get_data<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.data
            .lock()
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn has_data(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }

    /// Removes and returns the value under `key` if it has type `T`.
    ///
    /// A value of another type is left in place.
    pub fn remove_data<T: Any>(&self, key: &str) -> Option<T> {
        let mut data = self.data.lock();
        if !data.get(key).is_some_and(|v| v.is::<T>()) {
            return None;
        }
        data.remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    // ─── Resolved handler ─────────────────────────────────────────────────────

    /// Attaches the handler the terminal step will invoke.
    ///
    /// Called by the router middleware; other layers should treat the slot as
    /// read-only.
    pub fn set_handler(&self, handler: BoxedHandler) {
        *self.handler.lock() = Some(handler);
    }

    pub fn handler(&self) -> Option<BoxedHandler> {
        self.handler.lock().clone()
    }

    /// Records which registration the router matched.
    pub fn set_route(&self, route: RouteMatch) {
        *self.route.lock() = Some(route);
    }

    /// The matched registration, `None` when the default handler was used.
    pub fn route(&self) -> Option<RouteMatch> {
        self.route.lock().clone()
    }

    // ─── Replies ──────────────────────────────────────────────────────────────

    /// Sends `text` to the update's chat.
    pub async fn reply(&self, text: &str) -> TransportResult<MessageId> {
        let chat_id = self.chat_id().ok_or(TransportError::NoChat)?;
        self.transport.send_message(chat_id, text).await
    }

    /// Acknowledges the callback query this update carries.
    pub async fn answer_callback(&self, text: Option<&str>) -> TransportResult<()> {
        let query = self
            .update
            .as_callback_query()
            .ok_or(TransportError::NotCallback)?;
        self.transport.answer_callback(&query.id, text, false).await
    }

    /// Acknowledges the callback query with an alert dialog.
    pub async fn answer_callback_alert(&self, text: &str) -> TransportResult<()> {
        let query = self
            .update
            .as_callback_query()
            .ok_or(TransportError::NotCallback)?;
        self.transport.answer_callback(&query.id, Some(text), true).await
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("request_id", &self.request_id)
            .field("update_id", &self.update.update_id)
            .field("chat_id", &self.chat_id())
            .field("session", &*self.session.lock())
            .field("params", &*self.params.lock())
            .field("route", &*self.route.lock())
            .finish_non_exhaustive()
    }
}
