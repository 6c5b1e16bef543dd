use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Cookie holding the browser session id.
pub const SESSION_COOKIE: &str = "session_id";

/// Name of the per-room membership cookie, e.g. `player_K7Q2M`.
pub fn membership_cookie_name(room_code: &str) -> String {
    format!("player_{room_code}")
}

/// Issues and verifies membership tokens of the form
/// `<player_id>.<hex HMAC-SHA256(secret, "<room_code>:<player_id>")>`.
#[derive(Clone)]
pub struct MembershipSigner {
    secret: Vec<u8>,
}

impl MembershipSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Signer with a random 32-byte key, valid for this process only.
    pub fn random() -> Self {
        let mut secret = vec![0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        Self { secret }
    }

    fn mac(&self, room_code: &str, player_id: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(room_code.as_bytes());
        mac.update(b":");
        mac.update(player_id.as_bytes());
        Some(mac)
    }

    pub fn issue(&self, room_code: &str, player_id: &str) -> String {
        let sig = self
            .mac(room_code, player_id)
            .map(|m| hex::encode(m.finalize().into_bytes()))
            .unwrap_or_default();
        format!("{player_id}.{sig}")
    }

    /// Returns the player id if the token was issued for this room.
    pub fn verify(&self, room_code: &str, token: &str) -> Option<String> {
        let (player_id, hex_sig) = token.rsplit_once('.')?;
        if player_id.is_empty() {
            return None;
        }
        let expected = hex::decode(hex_sig).ok()?;
        let mac = self.mac(room_code, player_id)?;
        mac.verify_slice(&expected).ok()?;
        Some(player_id.to_string())
    }
}

/// Find a cookie value by name in the request headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
}

/// Verified player id from the room's membership cookie, if any.
pub fn membership_from_headers(
    signer: &MembershipSigner,
    headers: &HeaderMap,
    room_code: &str,
) -> Option<String> {
    let token = cookie_value(headers, &membership_cookie_name(room_code))?;
    signer.verify(room_code, &token)
}

/// `Set-Cookie` value for a room membership token.
pub fn membership_set_cookie(room_code: &str, token: &str) -> String {
    format!(
        "{}={token}; Path=/; HttpOnly; SameSite=Lax",
        membership_cookie_name(room_code)
    )
}

/// `Set-Cookie` value that clears a room membership cookie.
pub fn membership_clear_cookie(room_code: &str) -> String {
    format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        membership_cookie_name(room_code)
    )
}

pub fn session_set_cookie(session_id: &str) -> String {
    format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax")
}
