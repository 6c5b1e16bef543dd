use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::player::{Player, PlayerId};
use crate::roles::{MAX_PLAYERS, MIN_PLAYERS, RoleConfig};

/// Length of a room code.
pub const ROOM_CODE_LEN: usize = 5;

/// Seconds between the start request and the reveal.
pub const COUNTDOWN_SECONDS: u8 = 5;

/// Default seat limit for new rooms.
pub const DEFAULT_MAX_PLAYERS: u8 = 8;

const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Lifecycle of a room. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Lobby,
    Countdown,
    Playing,
    Ended,
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lobby => "lobby",
            Self::Countdown => "countdown",
            Self::Playing => "playing",
            Self::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Domain failures for room operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    NotFound(String),
    NotInLobby(RoomState),
    InvalidTransition { from: RoomState, to: RoomState },
    RoomFull,
    PlayerNotFound,
    NotHost,
    InvalidName,
    StartBlocked(Vec<String>),
    Validation(String),
    CodeSpaceExhausted,
}

impl fmt::Display for RoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(code) => write!(f, "Room {code} not found"),
            Self::NotInLobby(state) => write!(f, "Room is no longer in the lobby ({state})"),
            Self::InvalidTransition { from, to } => {
                write!(f, "Cannot move room from {from} to {to}")
            },
            Self::RoomFull => f.write_str("Room is full"),
            Self::PlayerNotFound => f.write_str("Player is not in this room"),
            Self::NotHost => f.write_str("Only the host can do that"),
            Self::InvalidName => f.write_str("Invalid player name"),
            Self::StartBlocked(reasons) => write!(f, "Cannot start: {}", reasons.join("; ")),
            Self::Validation(m) => f.write_str(m),
            Self::CodeSpaceExhausted => f.write_str("Could not allocate a unique room code"),
        }
    }
}

impl std::error::Error for RoomError {}

/// Result of one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    /// Still counting down; seconds left.
    Remaining(u8),
    /// Reached zero and the room is now `Playing`.
    Finished,
}

/// A single game session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub code: String,
    pub state: RoomState,
    pub players: HashMap<PlayerId, Player>,
    pub max_players: u8,
    pub roles: RoleConfig,
    pub countdown_remaining: u8,
    pub started_at: Option<SystemTime>,
    pub leader_revealed: bool,
}

impl Room {
    pub fn new(code: String) -> Self {
        Self::with_config(code, DEFAULT_MAX_PLAYERS, RoleConfig::default())
    }

    pub fn with_config(code: String, max_players: u8, roles: RoleConfig) -> Self {
        Self {
            code,
            state: RoomState::Lobby,
            players: HashMap::new(),
            max_players,
            roles,
            countdown_remaining: 0,
            started_at: None,
            leader_revealed: false,
        }
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn is_member(&self, id: &str) -> bool {
        self.players.contains_key(id)
    }

    /// The seat a browser session already holds, if any.
    pub fn player_for_session(&self, session_id: &str) -> Option<&Player> {
        self.players.values().find(|p| p.session_id == session_id)
    }

    pub fn host(&self) -> Option<&Player> {
        self.players.values().find(|p| p.is_host)
    }

    /// Players ordered by join time, ties broken by id.
    pub fn players_by_join_order(&self) -> Vec<&Player> {
        let mut players: Vec<&Player> = self.players.values().collect();
        players.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        players
    }

    fn require_lobby(&self) -> Result<(), RoomError> {
        if self.state == RoomState::Lobby {
            Ok(())
        } else {
            Err(RoomError::NotInLobby(self.state))
        }
    }

    pub fn require_host(&self, player_id: &str) -> Result<(), RoomError> {
        match self.players.get(player_id) {
            Some(p) if p.is_host => Ok(()),
            Some(_) => Err(RoomError::NotHost),
            None => Err(RoomError::PlayerNotFound),
        }
    }

    /// Seat a player. The first player in an empty room becomes host.
    pub fn add_player(&mut self, mut player: Player) -> Result<(), RoomError> {
        self.require_lobby()?;
        if self.players.len() >= usize::from(self.max_players) {
            return Err(RoomError::RoomFull);
        }
        player.is_host = self.players.is_empty();
        player.role = None;
        player.role_revealed = false;
        self.players.insert(player.id.clone(), player);
        Ok(())
    }

    /// Remove a player, handing host to the earliest remaining joiner if
    /// needed. Returns the removed player and the new host id, if host moved.
    pub fn remove_player(
        &mut self,
        player_id: &str,
    ) -> Result<(Player, Option<PlayerId>), RoomError> {
        self.require_lobby()?;
        let removed = self
            .players
            .remove(player_id)
            .ok_or(RoomError::PlayerNotFound)?;

        let mut new_host = None;
        if removed.is_host {
            let next = self.players_by_join_order().first().map(|p| p.id.clone());
            if let Some(id) = next
                && let Some(p) = self.players.get_mut(&id)
            {
                p.is_host = true;
                new_host = Some(id);
            }
        }
        Ok((removed, new_host))
    }

    /// Change seat limit and role counts. Only valid in the lobby.
    pub fn configure(&mut self, max_players: Option<u8>, roles: RoleConfig) -> Result<(), RoomError> {
        self.require_lobby()?;
        if let Some(max) = max_players {
            if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&max) {
                return Err(RoomError::Validation(format!(
                    "max_players must be between {MIN_PLAYERS} and {MAX_PLAYERS}"
                )));
            }
            if usize::from(max) < self.players.len() {
                return Err(RoomError::Validation(format!(
                    "max_players cannot be below the {} players already seated",
                    self.players.len()
                )));
            }
            self.max_players = max;
        }
        self.roles = roles;
        self.repair();
        Ok(())
    }

    /// Repair structurally invalid configuration. Returns true if changed.
    pub fn repair(&mut self) -> bool {
        let clamped = self.max_players.clamp(MIN_PLAYERS, MAX_PLAYERS);
        let mut changed = clamped != self.max_players;
        self.max_players = clamped;
        changed |= self.roles.repair(self.max_players);
        if changed {
            tracing::debug!(room = %self.code, max_players = self.max_players, "Repaired room config");
        }
        changed
    }

    pub fn needs_repair(&self) -> bool {
        !(MIN_PLAYERS..=MAX_PLAYERS).contains(&self.max_players)
            || !self.roles.is_well_formed(self.max_players)
    }

    /// Reasons the room cannot start right now. Empty when it can.
    pub fn start_issues(&self) -> Vec<String> {
        if self.state != RoomState::Lobby {
            return vec![format!("Room is already {}", self.state)];
        }
        self.roles.start_issues(self.players.len())
    }

    /// `Lobby -> Countdown`: deal roles and start the clock.
    pub fn start<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), RoomError> {
        if self.state != RoomState::Lobby {
            return Err(RoomError::InvalidTransition {
                from: self.state,
                to: RoomState::Countdown,
            });
        }
        let issues = self.start_issues();
        if !issues.is_empty() {
            return Err(RoomError::StartBlocked(issues));
        }

        let order: Vec<PlayerId> = self
            .players_by_join_order()
            .into_iter()
            .map(|p| p.id.clone())
            .collect();
        let deck = self.roles.deal(rng);
        for (id, role) in order.iter().zip(deck) {
            if let Some(p) = self.players.get_mut(id) {
                p.role = Some(role);
                p.role_revealed = false;
            }
        }

        self.state = RoomState::Countdown;
        self.started_at = Some(SystemTime::now());
        self.countdown_remaining = COUNTDOWN_SECONDS;
        Ok(())
    }

    /// One second of countdown. Transitions to `Playing` on reaching zero.
    pub fn advance_countdown(&mut self) -> Result<CountdownTick, RoomError> {
        if self.state != RoomState::Countdown {
            return Err(RoomError::InvalidTransition {
                from: self.state,
                to: RoomState::Playing,
            });
        }
        self.countdown_remaining = self.countdown_remaining.saturating_sub(1);
        if self.countdown_remaining == 0 {
            self.begin_playing();
            return Ok(CountdownTick::Finished);
        }
        Ok(CountdownTick::Remaining(self.countdown_remaining))
    }

    /// `Countdown -> Playing` without waiting for remaining ticks.
    pub fn finish_countdown(&mut self) -> Result<(), RoomError> {
        if self.state != RoomState::Countdown {
            return Err(RoomError::InvalidTransition {
                from: self.state,
                to: RoomState::Playing,
            });
        }
        self.begin_playing();
        Ok(())
    }

    fn begin_playing(&mut self) {
        self.state = RoomState::Playing;
        self.countdown_remaining = 0;
        self.leader_revealed = true;
    }

    /// `Playing -> Ended`.
    pub fn end(&mut self) -> Result<(), RoomError> {
        if self.state != RoomState::Playing {
            return Err(RoomError::InvalidTransition {
                from: self.state,
                to: RoomState::Ended,
            });
        }
        self.state = RoomState::Ended;
        Ok(())
    }

    /// Mark a player's card as shown. Idempotent.
    pub fn reveal_role(&mut self, player_id: &str) -> Result<bool, RoomError> {
        if self.state != RoomState::Playing {
            return Err(RoomError::Validation(
                "Roles can only be revealed during play".to_string(),
            ));
        }
        let player = self
            .players
            .get_mut(player_id)
            .ok_or(RoomError::PlayerNotFound)?;
        let changed = !player.role_revealed;
        player.role_revealed = true;
        Ok(changed)
    }

    /// Seconds left on the countdown measured from `started_at`, which may
    /// be zero or negative once the countdown should already be over.
    pub fn countdown_remaining_at(&self, now: SystemTime) -> i64 {
        let elapsed = self
            .started_at
            .and_then(|t| now.duration_since(t).ok())
            .unwrap_or(Duration::ZERO);
        i64::from(COUNTDOWN_SECONDS) - elapsed.as_secs() as i64
    }
}

/// Generate a random room code like `K7Q2M`.
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ROOM_CODE_CHARSET.len());
            ROOM_CODE_CHARSET[idx] as char
        })
        .collect()
}

/// Five uppercase ASCII letters or digits.
pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}
