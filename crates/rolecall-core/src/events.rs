use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::player::PlayerId;
use crate::roles::RoleConfig;

/// What changed in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    PlayerJoined {
        player_id: PlayerId,
        name: String,
    },
    PlayerLeft {
        player_id: PlayerId,
        #[serde(default)]
        new_host: Option<PlayerId>,
    },
    RoleConfigUpdated {
        max_players: u8,
        roles: RoleConfig,
    },
    GameStarted {
        started_at: SystemTime,
    },
    CountdownUpdate {
        remaining: u8,
    },
    GamePlaying,
    RoleRevealed {
        player_id: PlayerId,
    },
}

/// A state-change notification scoped to one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub room_code: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl RoomEvent {
    pub fn new(room_code: impl Into<String>, kind: EventKind) -> Self {
        Self {
            room_code: room_code.into(),
            kind,
        }
    }

    /// Wire name of the event, matching the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            EventKind::PlayerJoined { .. } => "player_joined",
            EventKind::PlayerLeft { .. } => "player_left",
            EventKind::RoleConfigUpdated { .. } => "role_config_updated",
            EventKind::GameStarted { .. } => "game_started",
            EventKind::CountdownUpdate { .. } => "countdown_update",
            EventKind::GamePlaying => "game_playing",
            EventKind::RoleRevealed { .. } => "role_revealed",
        }
    }
}

/// An event as delivered to subscribers, tagged with the id the event log
/// assigned it. Ids increase monotonically per room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub event: RoomEvent,
}
