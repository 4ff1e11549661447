//! Keyed FIFO event queues.
//!
//! Events with the same key are handled one at a time in arrival order;
//! distinct keys run concurrently on their own worker tasks. Channel events
//! key on the channel id and DM events on the chat id, which gives the
//! per-ticket per-direction ordering the relay relies on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

#[async_trait]
pub trait QueueHandler<E>: Send + Sync + 'static {
    async fn handle(&self, event: E);
}

pub struct OrderedQueues<E: Send + 'static> {
    handler: Arc<dyn QueueHandler<E>>,
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<E>>>,
    in_flight: Arc<AtomicUsize>,
}

impl<E: Send + 'static> OrderedQueues<E> {
    pub fn new(handler: Arc<dyn QueueHandler<E>>) -> Self {
        Self {
            handler,
            senders: Mutex::new(HashMap::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queues `event` behind any earlier events with the same key.
    pub fn enqueue(&self, key: &str, event: E) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let mut senders = self
            .senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let sender = senders
            .entry(key.to_string())
            .or_insert_with(|| self.spawn_worker());
        if let Err(returned) = sender.send(event) {
            // The worker can only be gone if its task was aborted; start a
            // fresh one and re-queue.
            let replacement = self.spawn_worker();
            if replacement.send(returned.0).is_err() {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                tracing::error!(key, "event queue worker unavailable; event dropped");
            }
            senders.insert(key.to_string(), replacement);
        }
    }

    fn spawn_worker(&self) -> mpsc::UnboundedSender<E> {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let handler = Arc::clone(&self.handler);
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                handler.handle(event).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        });
        sender
    }

    /// Waits until every queued event has been handled. Test hook.
    pub async fn drain(&self) {
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            tokio::task::yield_now().await;
        }
    }
}
