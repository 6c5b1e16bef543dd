use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Fewest players a game can start with.
pub const MIN_PLAYERS: u8 = 4;

/// Hard ceiling on room size.
pub const MAX_PLAYERS: u8 = 12;

/// Which side a role plays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Crown,
    Rebels,
}

/// The built-in role catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    /// Revealed to everyone once play begins.
    Leader,
    Loyalist,
    Traitor,
    Spy,
}

impl RoleKind {
    pub const ALL: [RoleKind; 4] = [
        RoleKind::Leader,
        RoleKind::Loyalist,
        RoleKind::Traitor,
        RoleKind::Spy,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Leader => "Leader",
            Self::Loyalist => "Loyalist",
            Self::Traitor => "Traitor",
            Self::Spy => "Spy",
        }
    }

    pub fn team(self) -> Team {
        match self {
            Self::Leader | Self::Loyalist => Team::Crown,
            Self::Traitor | Self::Spy => Team::Rebels,
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Target number of cards per role kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleConfig {
    counts: BTreeMap<RoleKind, u8>,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self::from_counts([
            (RoleKind::Leader, 1),
            (RoleKind::Loyalist, 2),
            (RoleKind::Traitor, 1),
        ])
    }
}

impl RoleConfig {
    pub fn from_counts(counts: impl IntoIterator<Item = (RoleKind, u8)>) -> Self {
        Self {
            counts: counts.into_iter().collect(),
        }
    }

    pub fn count(&self, kind: RoleKind) -> u8 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn set(&mut self, kind: RoleKind, count: u8) {
        self.counts.insert(kind, count);
    }

    /// Total number of cards in the deck.
    pub fn total(&self) -> usize {
        self.counts.values().map(|&n| usize::from(n)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RoleKind, u8)> + '_ {
        self.counts.iter().map(|(&k, &n)| (k, n))
    }

    /// Expand the counts into one card per seat, in catalog order.
    pub fn deck(&self) -> Vec<RoleKind> {
        self.counts
            .iter()
            .flat_map(|(&kind, &n)| std::iter::repeat_n(kind, usize::from(n)))
            .collect()
    }

    /// Shuffle the deck with the supplied RNG.
    pub fn deal<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<RoleKind> {
        let mut deck = self.deck();
        deck.shuffle(rng);
        deck
    }

    /// Repair structural problems in place until nothing changes.
    /// Returns true if anything was modified.
    pub fn repair(&mut self, max_players: u8) -> bool {
        let mut changed = false;
        while self.repair_step(max_players) {
            changed = true;
        }
        changed
    }

    /// True if `repair` would leave the config untouched.
    pub fn is_well_formed(&self, max_players: u8) -> bool {
        let mut probe = self.clone();
        !probe.repair(max_players)
    }

    fn repair_step(&mut self, max_players: u8) -> bool {
        let before = self.counts.len();
        self.counts.retain(|_, n| *n > 0);
        if self.counts.len() != before {
            return true;
        }

        if self.count(RoleKind::Leader) != 1 {
            self.counts.insert(RoleKind::Leader, 1);
            return true;
        }

        if self.total() > usize::from(max_players) {
            // Shed from the most plentiful non-leader role; ties go to the
            // later catalog entry.
            let victim = self
                .counts
                .iter()
                .filter(|(kind, _)| **kind != RoleKind::Leader)
                .max_by_key(|(kind, n)| (**n, **kind))
                .map(|(kind, _)| *kind);
            if let Some(kind) = victim
                && let Some(n) = self.counts.get_mut(&kind)
            {
                *n -= 1;
                return true;
            }
        }

        false
    }

    /// Human-readable reasons a game with `player_count` seated players
    /// cannot start. Empty when the game may start.
    pub fn start_issues(&self, player_count: usize) -> Vec<String> {
        let mut issues = Vec::new();
        if player_count < usize::from(MIN_PLAYERS) {
            issues.push(format!(
                "At least {MIN_PLAYERS} players are needed (currently {player_count})"
            ));
        }
        if self.count(RoleKind::Leader) != 1 {
            issues.push("Exactly one Leader must be configured".to_string());
        }
        let total = self.total();
        if total > player_count {
            issues.push(format!(
                "Not enough players for the configured roles ({total} roles, {player_count} players)"
            ));
        } else if total < player_count {
            issues.push(format!(
                "Not enough roles for the players in the room ({total} roles, {player_count} players)"
            ));
        }
        issues
    }
}
