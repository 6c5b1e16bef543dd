use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::roles::RoleKind;

/// Opaque player identifier (UUID v4 string).
pub type PlayerId = String;

/// Maximum display name length, in characters.
pub const MAX_NAME_LEN: usize = 32;

/// A player seated in a Rolecall room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Browser session that owns this seat.
    pub session_id: String,
    pub is_host: bool,
    pub joined_at: SystemTime,
    #[serde(default)]
    pub role: Option<RoleKind>,
    #[serde(default)]
    pub role_revealed: bool,
}

impl Player {
    /// Create a new player with a fresh id, joining now.
    pub fn new(name: String, session_id: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            session_id,
            is_host: false,
            joined_at: SystemTime::now(),
            role: None,
            role_revealed: false,
        }
    }
}

/// Trim and validate a display name. Returns `None` if it is empty, too
/// long, or contains control characters.
pub fn normalize_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    if name.is_empty()
        || name.chars().count() > MAX_NAME_LEN
        || name.chars().any(|c| c.is_control())
    {
        return None;
    }
    Some(name.to_string())
}
