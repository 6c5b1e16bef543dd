use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Counts live streaming sessions per room and in total.
///
/// Observational only: nothing consults these numbers to admit or reject a
/// connection.
#[derive(Default)]
pub struct ConnectionRegistry {
    per_room: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.per_room
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count a new session. The returned guard uncounts it when dropped.
    pub fn open(self: &Arc<Self>, room_code: &str) -> ConnectionGuard {
        *self.lock().entry(room_code.to_string()).or_insert(0) += 1;
        self.total.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            registry: Arc::clone(self),
            room_code: room_code.to_string(),
        }
    }

    fn close(&self, room_code: &str) {
        let mut rooms = self.lock();
        if let Some(count) = rooms.get_mut(room_code) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                rooms.remove(room_code);
            }
            self.total.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn room_count(&self, room_code: &str) -> usize {
        self.lock().get(room_code).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }
}

/// RAII guard that decrements the registry when a session ends, on every
/// exit path including unwinding.
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    room_code: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.close(&self.room_code);
    }
}
