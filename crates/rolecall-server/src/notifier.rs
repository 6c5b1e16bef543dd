use std::sync::{Arc, Mutex};

use rolecall_core::events::{Envelope, EventKind, RoomEvent};

use crate::bus::EventBus;
use crate::event_log::EventLog;

/// Write side of the event pipeline: stamp an event with its log id, keep
/// it for replay, then fan it out on the bus.
#[derive(Clone)]
pub struct Notifier {
    bus: Arc<EventBus>,
    log: Arc<EventLog>,
    // Held across record + publish so delivery order matches id order.
    order: Arc<Mutex<()>>,
}

impl Notifier {
    pub fn new(bus: Arc<EventBus>, log: Arc<EventLog>) -> Self {
        Self {
            bus,
            log,
            order: Arc::new(Mutex::new(())),
        }
    }

    pub fn publish(&self, room_code: &str, kind: EventKind) -> Arc<Envelope> {
        let (envelope, delivered) = {
            let _order = self
                .order
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let envelope = self.log.record(RoomEvent::new(room_code, kind));
            let delivered = self.bus.publish(Arc::clone(&envelope));
            (envelope, delivered)
        };
        tracing::debug!(
            room = room_code,
            event = envelope.event.event_type(),
            id = envelope.id,
            delivered,
            "Published room event"
        );
        envelope
    }
}
