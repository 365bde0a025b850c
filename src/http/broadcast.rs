//! Fan-out of unsolicited peer frames to live SSE subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Events buffered per subscriber before new ones are dropped for it.
const SUBSCRIBER_QUEUE_DEPTH: usize = 64;

type Subscribers = Mutex<HashMap<u64, mpsc::Sender<Arc<str>>>>;

/// Typed subscriber list for unsolicited frames.
///
/// Each subscriber owns a bounded queue of serialized payloads. A subscriber
/// whose queue is full misses the event; one whose receiver is gone is
/// pruned. Neither case affects the other subscribers.
#[derive(Debug, Default)]
pub struct BroadcastRouter {
    subscribers: Arc<Subscribers>,
    next_id: AtomicU64,
}

/// A live subscription. Dropping it deregisters the subscriber.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Arc<str>>,
    _guard: SubscriberGuard,
}

impl Subscription {
    /// Wait for the next serialized payload; `None` once the router closed
    /// this subscriber.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }
}

#[derive(Debug)]
struct SubscriberGuard {
    id: u64,
    subscribers: Arc<Subscribers>,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let removed = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id)
            .is_some();
        if removed {
            debug!(subscriber = self.id, "sse subscriber disconnected");
        }
    }
}

impl BroadcastRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        self.lock().insert(id, tx);
        debug!(subscriber = id, "sse subscriber connected");

        Subscription {
            rx,
            _guard: SubscriberGuard {
                id,
                subscribers: Arc::clone(&self.subscribers),
            },
        }
    }

    /// Serialize `data` once and offer it to every subscriber.
    ///
    /// Returns the number of subscribers the event was queued for.
    pub fn publish(&self, data: &serde_json::Value) -> usize {
        let payload: Arc<str> = match serde_json::to_string(data) {
            Ok(text) => text.into(),
            Err(err) => {
                warn!(%err, "failed to serialise broadcast event");
                return 0;
            }
        };

        let mut subscribers = self.lock();
        let mut delivered = 0;
        subscribers.retain(|id, tx| match tx.try_send(Arc::clone(&payload)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = id, "sse subscriber lagging, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = id, "pruning closed sse subscriber");
                false
            }
        });
        delivered
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Drop every subscriber; their streams end once drained.
    pub fn close_all(&self) -> usize {
        let mut subscribers = self.lock();
        let count = subscribers.len();
        subscribers.clear();
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::Sender<Arc<str>>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
