use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use super::Session;
use crate::error::{SessionError, SessionResult};
use crate::update::ChatId;

/// A mutation applied to a session under the store's exclusive lock.
pub type SessionMutation<'a> = Box<dyn FnOnce(&mut Session) + Send + 'a>;

/// Storage contract for chat sessions.
///
/// Implementations are shared by every in-flight dispatch and must be safe
/// for concurrent use.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Returns a copy of the chat's session, creating a blank one on first use.
    ///
    /// Concurrent callers for a new chat observe exactly one created session.
    async fn get_or_create(&self, chat_id: ChatId) -> SessionResult<Session>;

    /// Replaces the stored session for `chat_id`.
    ///
    /// Fails with [`SessionError::NotFound`] if the chat was never initialised
    /// through [`get_or_create`](Self::get_or_create).
    async fn set(&self, chat_id: ChatId, session: Session) -> SessionResult<()>;

    /// Removes the chat's session.
    async fn delete(&self, chat_id: ChatId) -> SessionResult<()>;

    /// Applies `mutation` to the chat's session atomically, creating it first
    /// if needed.
    async fn modify(&self, chat_id: ChatId, mutation: SessionMutation<'_>) -> SessionResult<()>;
}

/// Convenience methods over any [`SessionStore`].
#[async_trait]
pub trait SessionStoreExt: SessionStore {
    /// Like [`SessionStore::modify`] but hands back the closure's result.
    async fn mutate<F, R>(&self, chat_id: ChatId, f: F) -> SessionResult<R>
    where
        F: FnOnce(&mut Session) -> R + Send,
        R: Send,
    {
        let mut out = None;
        self.modify(
            chat_id,
            Box::new(|session: &mut Session| out = Some(f(session))),
        )
        .await?;
        out.ok_or_else(|| SessionError::Backend("session mutation was not applied".into()))
    }
}

impl<S: SessionStore + ?Sized> SessionStoreExt for S {}

/// Counters exposed by [`MemorySessionStore::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStoreStats {
    /// Sessions currently held.
    pub sessions: usize,
    /// Sessions created since the store was built.
    pub created: u64,
}

/// In-process [`SessionStore`] backed by a reader/writer-locked map.
///
/// Hits on [`get_or_create`](SessionStore::get_or_create) take the shared
/// lock; creation, writes and deletes take the exclusive lock. Sessions are
/// kept until deleted.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<ChatId, Session>>,
    created: AtomicU64,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chats with a stored session.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn stats(&self) -> SessionStoreStats {
        SessionStoreStats {
            sessions: self.len(),
            created: self.created.load(Ordering::SeqCst),
        }
    }

    fn create_locked(&self, sessions: &mut HashMap<ChatId, Session>, chat_id: ChatId) -> Session {
        sessions
            .entry(chat_id)
            .or_insert_with(|| {
                self.created.fetch_add(1, Ordering::SeqCst);
                trace!(chat_id, "Created session");
                Session::new(chat_id)
            })
            .clone()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_or_create(&self, chat_id: ChatId) -> SessionResult<Session> {
        if let Some(session) = self.sessions.read().get(&chat_id) {
            return Ok(session.clone());
        }
        // Another caller may have created it between the two locks.
        let mut sessions = self.sessions.write();
        Ok(self.create_locked(&mut sessions, chat_id))
    }

    async fn set(&self, chat_id: ChatId, session: Session) -> SessionResult<()> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&chat_id) {
            Some(slot) => {
                *slot = session;
                Ok(())
            }
            None => Err(SessionError::NotFound(chat_id)),
        }
    }

    async fn delete(&self, chat_id: ChatId) -> SessionResult<()> {
        self.sessions.write().remove(&chat_id);
        Ok(())
    }

    async fn modify(&self, chat_id: ChatId, mutation: SessionMutation<'_>) -> SessionResult<()> {
        let mut sessions = self.sessions.write();
        if !sessions.contains_key(&chat_id) {
            self.create_locked(&mut sessions, chat_id);
        }
        if let Some(session) = sessions.get_mut(&chat_id) {
            mutation(session);
        }
        Ok(())
    }
}
