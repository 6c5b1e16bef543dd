use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use rolecall_core::roles::RoleConfig;
use rolecall_core::room::{Room, RoomError, generate_room_code};

use crate::config::RoomsConfig;

/// Produces candidate room codes.
pub type CodeGenerator = fn() -> String;

struct RoomEntry {
    room: Room,
    last_activity: Instant,
}

/// In-memory store of live rooms keyed by code.
///
/// Reads share the lock; every write is exclusive. Callers get owned
/// snapshots and must re-fetch before trusting fields another task may have
/// changed since.
pub struct RoomRepository {
    rooms: RwLock<HashMap<String, RoomEntry>>,
    default_max_players: u8,
    default_roles: RoleConfig,
    code_attempts: usize,
    code_generator: CodeGenerator,
}

impl RoomRepository {
    pub fn new(config: &RoomsConfig) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_max_players: config.default_max_players,
            default_roles: RoleConfig::default(),
            code_attempts: config.code_attempts,
            code_generator: generate_room_code,
        }
    }

    /// Swap the code source. Tests use this to force collisions.
    pub fn with_code_generator(mut self, generator: CodeGenerator) -> Self {
        self.code_generator = generator;
        self
    }

    /// Create an empty lobby room under a fresh code.
    pub async fn create(&self) -> Result<Room, RoomError> {
        let mut rooms = self.rooms.write().await;
        for attempt in 1..=self.code_attempts {
            let code = (self.code_generator)();
            if rooms.contains_key(&code) {
                tracing::debug!(attempt, code = %code, "Room code collision, retrying");
                continue;
            }
            let mut room =
                Room::with_config(code.clone(), self.default_max_players, self.default_roles.clone());
            room.repair();
            rooms.insert(
                code,
                RoomEntry {
                    room: room.clone(),
                    last_activity: Instant::now(),
                },
            );
            return Ok(room);
        }
        tracing::error!(attempts = self.code_attempts, "Exhausted room code attempts");
        Err(RoomError::CodeSpaceExhausted)
    }

    /// Fetch a snapshot. A room whose configuration is structurally broken
    /// is repaired and saved before it is returned.
    pub async fn get(&self, code: &str) -> Result<Room, RoomError> {
        {
            let rooms = self.rooms.read().await;
            let entry = rooms
                .get(code)
                .ok_or_else(|| RoomError::NotFound(code.to_string()))?;
            if !entry.room.needs_repair() {
                return Ok(entry.room.clone());
            }
        }

        let mut rooms = self.rooms.write().await;
        let entry = rooms
            .get_mut(code)
            .ok_or_else(|| RoomError::NotFound(code.to_string()))?;
        if entry.room.repair() {
            tracing::info!(room = code, "Repaired invalid role configuration");
        }
        Ok(entry.room.clone())
    }

    /// Insert or replace a room by its code.
    pub async fn update(&self, room: Room) {
        let mut rooms = self.rooms.write().await;
        let code = room.code.clone();
        rooms.insert(
            code,
            RoomEntry {
                room,
                last_activity: Instant::now(),
            },
        );
    }

    /// Apply a mutation under the write lock. The change is committed only
    /// if `f` succeeds; on error the stored room is left untouched.
    pub async fn modify<T>(
        &self,
        code: &str,
        f: impl FnOnce(&mut Room) -> Result<T, RoomError>,
    ) -> Result<(T, Room), RoomError> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms
            .get_mut(code)
            .ok_or_else(|| RoomError::NotFound(code.to_string()))?;
        let mut draft = entry.room.clone();
        let out = f(&mut draft)?;
        entry.room = draft;
        entry.last_activity = Instant::now();
        Ok((out, entry.room.clone()))
    }

    pub async fn contains(&self, code: &str) -> bool {
        self.rooms.read().await.contains_key(code)
    }

    pub async fn remove(&self, code: &str) -> Option<Room> {
        self.rooms.write().await.remove(code).map(|e| e.room)
    }

    /// Drop rooms untouched for longer than `max_idle`. Returns their codes.
    pub async fn remove_idle(&self, max_idle: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut rooms = self.rooms.write().await;
        let stale: Vec<String> = rooms
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_activity) >= max_idle)
            .map(|(code, _)| code.clone())
            .collect();
        for code in &stale {
            rooms.remove(code);
        }
        stale
    }

    /// (room count, seated player count)
    pub async fn stats(&self) -> (usize, usize) {
        let rooms = self.rooms.read().await;
        let players = rooms.values().map(|e| e.room.players.len()).sum();
        (rooms.len(), players)
    }

    #[cfg(test)]
    async fn age(&self, code: &str, by: Duration) {
        let mut rooms = self.rooms.write().await;
        if let Some(entry) = rooms.get_mut(code)
            && let Some(earlier) = entry.last_activity.checked_sub(by)
        {
            entry.last_activity = earlier;
        }
    }
}
