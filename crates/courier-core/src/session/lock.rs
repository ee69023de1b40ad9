use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::update::ChatId;

type LockMap = HashMap<ChatId, Slot>;

#[derive(Debug, Default)]
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    /// Holders plus waiters.
    users: usize,
}

/// Per-chat exclusive locks.
///
/// Holding a [`ChatGuard`] for a chat guarantees no other holder exists for
/// the same chat; different chats never contend. Map entries are created on
/// demand and removed when the last guard or waiter for a chat goes away,
/// including waiters whose `acquire` future is dropped before it completes.
#[derive(Debug, Clone, Default)]
pub struct ChatLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl ChatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the chat's lock is free and takes it.
    pub async fn acquire(&self, chat_id: ChatId) -> ChatGuard {
        let (lock, ticket) = {
            let mut locks = self.locks.lock();
            let slot = locks.entry(chat_id).or_default();
            slot.users += 1;
            let ticket = Ticket {
                chat_id,
                locks: Arc::clone(&self.locks),
            };
            (Arc::clone(&slot.lock), ticket)
        };
        let guard = lock.lock_owned().await;
        ChatGuard {
            _guard: guard,
            ticket,
        }
    }

    /// Number of chats that currently have a holder or waiter.
    pub fn active(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Registration of one holder or waiter; unregisters on drop.
#[derive(Debug)]
struct Ticket {
    chat_id: ChatId,
    locks: Arc<Mutex<LockMap>>,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        if let Some(slot) = locks.get_mut(&self.chat_id) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                locks.remove(&self.chat_id);
            }
        }
    }
}

/// Exclusive access to one chat, released on drop.
#[derive(Debug)]
pub struct ChatGuard {
    // Dropped before `ticket`: the lock is released before the entry can go.
    _guard: OwnedMutexGuard<()>,
    ticket: Ticket,
}

impl ChatGuard {
    pub fn chat_id(&self) -> ChatId {
        self.ticket.chat_id
    }
}
