use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use rolecall_core::events::Envelope;

/// Default per-subscriber inbox capacity.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 10;

/// Identifies one subscription within the bus.
pub type SubscriptionId = u64;

type SubscriberMap = HashMap<String, Vec<(SubscriptionId, mpsc::Sender<Arc<Envelope>>)>>;

/// A subscriber's end of the bus: a bounded inbox for one room.
pub struct Subscription {
    pub id: SubscriptionId,
    pub room_code: String,
    rx: mpsc::Receiver<Arc<Envelope>>,
}

impl Subscription {
    /// Next event, or `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<Envelope>> {
        self.rx.try_recv().ok()
    }
}

/// Per-room publish/subscribe fan-out.
///
/// Every subscriber owns a bounded queue. `publish` uses `try_send`, so a
/// full queue loses that event for that subscriber only and the publisher
/// never waits. Delivery is at-most-once and FIFO per subscriber.
///
/// A single mutex guards the whole subscriber map.
pub struct EventBus {
    subscribers: Mutex<SubscriberMap>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SubscriberMap> {
        // Nothing panics while holding this lock; recover the map if a
        // caller ever did.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self, room_code: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.lock()
            .entry(room_code.to_string())
            .or_default()
            .push((id, tx));
        tracing::debug!(room = room_code, subscription = id, "Subscribed");
        Subscription {
            id,
            room_code: room_code.to_string(),
            rx,
        }
    }

    /// Remove a subscription. Dropping its sender closes the inbox, so a
    /// reader blocked in `recv` wakes with `None`. Unknown ids are ignored.
    pub fn unsubscribe(&self, room_code: &str, id: SubscriptionId) {
        let mut subs = self.lock();
        let Some(list) = subs.get_mut(room_code) else {
            return;
        };
        list.retain(|(sid, _)| *sid != id);
        if list.is_empty() {
            subs.remove(room_code);
        }
    }

    /// Deliver to every current subscriber of the event's room. Returns the
    /// number of inboxes that accepted it.
    pub fn publish(&self, envelope: Arc<Envelope>) -> usize {
        let room_code = envelope.event.room_code.as_str();
        let subs = self.lock();
        let Some(list) = subs.get(room_code) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, tx) in list {
            match tx.try_send(Arc::clone(&envelope)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(
                        room = room_code,
                        subscription = id,
                        event = envelope.event.event_type(),
                        "Inbox full, dropping event for slow subscriber"
                    );
                },
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(room = room_code, subscription = id, "Inbox closed");
                },
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, room_code: &str) -> usize {
        self.lock().get(room_code).map_or(0, Vec::len)
    }

    /// Drop every subscription for a room, closing their inboxes.
    pub fn close_room(&self, room_code: &str) {
        self.lock().remove(room_code);
    }
}
