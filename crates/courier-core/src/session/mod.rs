//! Per-chat conversation state.
//!
//! - [`Session`]: the state name and data bag of one chat.
//! - [`SessionStore`]: the storage contract, with [`MemorySessionStore`] as the
//!   in-process implementation.
//! - [`ChatLocks`]: per-chat async locks used to serialise dispatch for the
//!   same chat so read-modify-write cycles on its session never interleave.

mod lock;
mod store;

pub use lock::{ChatGuard, ChatLocks};
pub use store::{MemorySessionStore, SessionStore, SessionStoreExt, SessionStoreStats};

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionResult;
use crate::update::ChatId;

/// Conversation state of one chat.
///
/// The state name drives message routing; an empty state means "no state".
/// The data bag holds arbitrary JSON-representable values keyed by string,
/// with last-write-wins semantics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Session {
    chat_id: ChatId,
    #[serde(default)]
    state: String,
    #[serde(default)]
    data: HashMap<String, Value>,
}

impl Session {
    /// A fresh session with no state and an empty bag.
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            state: String::new(),
            data: HashMap::new(),
        }
    }

    /// Builder-style state assignment.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    /// The current state name, empty when none is set.
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn has_state(&self) -> bool {
        !self.state.is_empty()
    }

    pub fn set_state(&mut self, state: impl Into<String>) {
        self.state = state.into();
    }

    pub fn clear_state(&mut self) {
        self.state.clear();
    }

    /// Reads a typed value from the bag.
    ///
    /// Returns `None` if the key is absent or holds a value of another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Reads the raw JSON value stored under `key`.
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Stores a typed value in the bag, replacing any previous value.
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> SessionResult<()> {
        let value = serde_json::to_value(value)?;
        self.data.insert(key.into(), value);
        Ok(())
    }

    /// Removes a key, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// All keys currently in the bag, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    /// Empties the bag; the state is kept.
    pub fn clear_data(&mut self) {
        self.data.clear();
    }

    /// Empties the bag and resets the state.
    pub fn clear_all(&mut self) {
        self.clear_data();
        self.clear_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_blank() {
        let session = Session::new(7);
        assert_eq!(session.chat_id(), 7);
        assert_eq!(session.state(), "");
        assert!(!session.has_state());
        assert!(session.keys().is_empty());
    }

    #[test]
    fn test_typed_bag_round_trip() {
        let mut session = Session::new(1);
        session.set("count", 3_u32).unwrap();
        session.set("name", "ada").unwrap();

        assert_eq!(session.get::<u32>("count"), Some(3));
        assert_eq!(session.get::<String>("name").as_deref(), Some("ada"));
        // Shape mismatch reads as absent.
        assert_eq!(session.get::<u32>("name"), None);
        assert_eq!(session.get::<u32>("missing"), None);
    }

    #[test]
    fn test_clear_data_keeps_state() {
        let mut session = Session::new(1).with_state("waiting_for_input");
        session.set("temp", true).unwrap();

        session.clear_data();
        assert!(session.keys().is_empty());
        assert_eq!(session.state(), "waiting_for_input");

        session.set("temp", true).unwrap();
        session.clear_all();
        assert!(session.keys().is_empty());
        assert!(!session.has_state());
    }

    #[test]
    fn test_last_write_wins() {
        let mut session = Session::new(1);
        session.set("k", 1).unwrap();
        session.set("k", 2).unwrap();
        assert_eq!(session.get::<i32>("k"), Some(2));
        assert_eq!(session.remove("k"), Some(Value::from(2)));
        assert!(!session.contains_key("k"));
    }
}
