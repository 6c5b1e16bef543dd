pub mod events;
pub mod player;
pub mod roles;
pub mod room;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use std::time::{Duration, SystemTime};

    use crate::player::Player;
    use crate::room::Room;

    /// Create `n` players with staggered join times, the first one earliest.
    pub fn make_players(n: usize) -> Vec<Player> {
        (0..n)
            .map(|i| {
                let mut p = Player::new(format!("Player{}", i + 1), format!("session-{}", i + 1));
                p.joined_at = SystemTime::UNIX_EPOCH + Duration::from_secs(i as u64);
                p
            })
            .collect()
    }

    /// A lobby room with `n` seated players and the default role config.
    pub fn make_room(code: &str, n: usize) -> Room {
        let mut room = Room::new(code.to_string());
        for p in make_players(n) {
            room.add_player(p)
                .expect("fixture room must accept its players");
        }
        room
    }
}
