//! Session loading middleware.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{error, trace, warn};

use courier_core::{ChatLocks, SessionStore};

use crate::context::DispatchContext;
use crate::middleware::{Middleware, Next};

/// Loads the chat's session before the downstream chain runs and writes it
/// back afterwards.
///
/// Dispatches for the same chat are serialised for the whole
/// load, run, write-back cycle, so concurrent updates from one chat never
/// overwrite each other's session changes. Updates without a chat run without
/// a session.
#[derive(Clone)]
pub struct SessionMiddleware {
    store: Arc<dyn SessionStore>,
    locks: ChatLocks,
}

impl SessionMiddleware {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            locks: ChatLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Chats with a dispatch currently holding or waiting for the lock.
    pub fn active_chats(&self) -> usize {
        self.locks.active()
    }
}

impl fmt::Debug for SessionMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMiddleware")
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl Middleware for SessionMiddleware {
    fn handle(&self, ctx: Arc<DispatchContext>, next: Next) -> BoxFuture<'static, ()> {
        let store = Arc::clone(&self.store);
        let locks = self.locks.clone();
        Box::pin(async move {
            let Some(chat_id) = ctx.chat_id() else {
                warn!(
                    request_id = %ctx.request_id(),
                    update_id = ctx.update().update_id,
                    kind = ctx.update().kind_name(),
                    "Cannot retrieve chat id from update, continuing without session"
                );
                next.run(ctx).await;
                return;
            };

            let _guard = locks.acquire(chat_id).await;

            match store.get_or_create(chat_id).await {
                Ok(session) => ctx.set_session(session),
                Err(e) => {
                    warn!(
                        request_id = %ctx.request_id(),
                        chat_id,
                        error = %e,
                        "Failed to load session, continuing without session"
                    );
                    next.run(ctx).await;
                    return;
                }
            }

            next.run(Arc::clone(&ctx)).await;

            let Some(session) = ctx.session() else {
                trace!(request_id = %ctx.request_id(), chat_id, "Session removed during dispatch");
                return;
            };
            if let Err(e) = store.set(chat_id, session).await {
                error!(
                    request_id = %ctx.request_id(),
                    chat_id,
                    error = %e,
                    "Failed to save session"
                );
            }
        })
    }
}
