//! Per-chat update scheduling.
//!
//! Every chat with pending updates gets one worker task fed by an unbounded
//! FIFO queue, so a chat's updates are dispatched one at a time and in
//! arrival order. Workers retire as soon as their queue is empty. A worker
//! only takes an in-flight permit while it is actually dispatching, so a chat
//! with a long backlog never holds more than one permit and other chats keep
//! running. Updates without a chat are dispatched on their own task.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{trace, warn};

use courier_core::{ChatId, Update};
use courier_framework::Dispatcher;

/// An update accepted from the stream.
///
/// `slot` is the `max_pending` permit taken before the update was pulled;
/// it is released once the update has been dispatched or discarded.
pub(crate) struct Pending {
    pub update: Update,
    pub slot: OwnedSemaphorePermit,
}

type QueueMap = HashMap<ChatId, mpsc::UnboundedSender<Pending>>;

/// Hands updates to per-chat workers spawned on a [`TaskTracker`].
#[derive(Clone)]
pub(crate) struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    dispatcher: Arc<Dispatcher>,
    in_flight: Arc<Semaphore>,
    /// Parent of every dispatch token.
    token: CancellationToken,
    /// Cancelled when queued updates should be dropped instead of dispatched.
    abort: CancellationToken,
    tracker: TaskTracker,
    queues: Mutex<QueueMap>,
}

impl Scheduler {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        max_in_flight: usize,
        token: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
                token,
                abort: CancellationToken::new(),
                tracker,
                queues: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Queues `pending` behind earlier updates of the same chat.
    pub fn schedule(&self, pending: Pending) {
        let Some(chat_id) = pending.update.chat_id() else {
            let this = self.clone();
            self.inner.tracker.spawn(async move { this.run(pending).await });
            return;
        };

        let mut queues = self.inner.queues.lock();
        let pending = match queues.get(&chat_id) {
            Some(queue) => match queue.send(pending) {
                Ok(()) => return,
                // The worker is gone without retiring its queue; start over.
                Err(mpsc::error::SendError(pending)) => pending,
            },
            None => pending,
        };

        let (queue, rx) = mpsc::unbounded_channel();
        queues.insert(chat_id, queue);
        drop(queues);

        trace!(chat_id, "Starting chat worker");
        let this = self.clone();
        self.inner
            .tracker
            .spawn(async move { this.work(chat_id, pending, rx).await });
    }

    /// Drops queued updates instead of dispatching them.
    pub fn abort(&self) {
        self.inner.abort.cancel();
    }

    /// Chats that currently have a worker.
    pub fn active_chats(&self) -> usize {
        self.inner.queues.lock().len()
    }

    async fn work(
        self,
        chat_id: ChatId,
        first: Pending,
        mut rx: mpsc::UnboundedReceiver<Pending>,
    ) {
        let mut next = Some(first);
        while let Some(pending) = next {
            self.run(pending).await;
            next = self.next_or_retire(chat_id, &mut rx);
        }
        trace!(chat_id, "Chat worker retired");
    }

    /// Takes the chat's next update, or removes the queue if there is none.
    ///
    /// The emptiness check and the removal happen under the map lock, which
    /// `schedule` also holds while sending, so no update is left behind.
    fn next_or_retire(
        &self,
        chat_id: ChatId,
        rx: &mut mpsc::UnboundedReceiver<Pending>,
    ) -> Option<Pending> {
        if let Ok(pending) = rx.try_recv() {
            return Some(pending);
        }
        let mut queues = self.inner.queues.lock();
        match rx.try_recv() {
            Ok(pending) => Some(pending),
            Err(_) => {
                queues.remove(&chat_id);
                None
            }
        }
    }

    async fn run(&self, pending: Pending) {
        let Pending { update, slot } = pending;
        let update_id = update.update_id;

        let permit = tokio::select! {
            biased;
            _ = self.inner.abort.cancelled() => None,
            permit = Arc::clone(&self.inner.in_flight).acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            warn!(update_id, "Discarding queued update during shutdown");
            return;
        };

        self.inner
            .dispatcher
            .dispatch(update, self.inner.token.child_token())
            .await;
        drop(permit);
        drop(slot);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("active_chats", &self.active_chats())
            .field("available_permits", &self.inner.in_flight.available_permits())
            .finish_non_exhaustive()
    }
}
