use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use rolecall_core::events::{Envelope, RoomEvent};

/// Default number of events retained per room.
const DEFAULT_MAX_STORED_EVENTS: usize = 100;

/// Bounded history for one room.
#[derive(Default)]
struct RoomLog {
    next_id: u64,
    events: VecDeque<Arc<Envelope>>,
}

/// Aggregate statistics about the event log.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EventLogStats {
    pub rooms: usize,
    pub total_stored: usize,
}

/// In-memory, bounded per-room event history for `Last-Event-ID` replay.
///
/// Ids are assigned here and increase monotonically within a room. A client
/// that was away longer than the window silently misses the oldest events
/// and has to fall back to a full render.
pub struct EventLog {
    rooms: Mutex<HashMap<String, RoomLog>>,
    max_stored_events: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_STORED_EVENTS)
    }

    pub fn with_capacity(max_stored_events: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            max_stored_events: max_stored_events.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RoomLog>> {
        self.rooms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an event, assigning the next id for its room. Evicts the
    /// oldest entry when the room is at capacity.
    pub fn record(&self, event: RoomEvent) -> Arc<Envelope> {
        let mut rooms = self.lock();
        let log = rooms.entry(event.room_code.clone()).or_default();
        log.next_id += 1;
        let envelope = Arc::new(Envelope {
            id: log.next_id,
            event,
        });
        log.events.push_back(Arc::clone(&envelope));
        while log.events.len() > self.max_stored_events {
            log.events.pop_front();
        }
        envelope
    }

    /// Events a reconnecting client missed.
    ///
    /// - no marker: nothing, the client is assumed current
    /// - marker not in the window (or not a number): the whole window
    /// - known marker: only events strictly after it
    pub fn events_since(&self, room_code: &str, last_id: Option<&str>) -> Vec<Arc<Envelope>> {
        let Some(marker) = last_id.map(str::trim).filter(|s| !s.is_empty()) else {
            return Vec::new();
        };
        let rooms = self.lock();
        let Some(log) = rooms.get(room_code) else {
            return Vec::new();
        };

        let known = marker
            .parse::<u64>()
            .ok()
            .and_then(|id| log.events.iter().position(|e| e.id == id));
        match known {
            Some(pos) => log.events.iter().skip(pos + 1).cloned().collect(),
            None => log.events.iter().cloned().collect(),
        }
    }

    /// Get the most recent N events for a room, newest first.
    pub fn recent(&self, room_code: &str, count: usize) -> Vec<Arc<Envelope>> {
        self.lock()
            .get(room_code)
            .map(|log| log.events.iter().rev().take(count).cloned().collect())
            .unwrap_or_default()
    }

    /// Discard a room's history.
    pub fn forget(&self, room_code: &str) {
        self.lock().remove(room_code);
    }

    pub fn stats(&self) -> EventLogStats {
        let rooms = self.lock();
        EventLogStats {
            rooms: rooms.len(),
            total_stored: rooms.values().map(|l| l.events.len()).sum(),
        }
    }
}
