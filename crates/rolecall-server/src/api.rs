use axum::Json;
use axum::extract::{Path, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use rolecall_core::events::EventKind;
use rolecall_core::player::{Player, PlayerId, normalize_name};
use rolecall_core::roles::{RoleConfig, RoleKind, Team};
use rolecall_core::room::{Room, RoomError, RoomState, is_valid_room_code};

use crate::auth::{
    SESSION_COOKIE, cookie_value, membership_clear_cookie, membership_from_headers,
    membership_set_cookie, session_set_cookie,
};
use crate::error::AppError;
use crate::state::AppState;

const MAX_SESSION_ID_LEN: usize = 64;

#[derive(Debug, Deserialize)]
pub struct NameBody {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RolesBody {
    #[serde(default)]
    pub max_players: Option<u8>,
    pub roles: RoleConfig,
}

/// Returned by create and join.
#[derive(Debug, Serialize, Deserialize)]
pub struct SeatResponse {
    pub room_code: String,
    pub player_id: PlayerId,
    pub is_host: bool,
    pub redirect: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedirectResponse {
    pub redirect: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub state: RoomState,
    pub countdown_remaining: u8,
    pub redirect: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevealResponse {
    pub role: RoleKind,
    pub team: Team,
}

/// A player as anyone may see them. `role` is present only once it is
/// public: revealed by its holder, or the Leader once play begins.
#[derive(Debug, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub is_host: bool,
    pub role: Option<RoleKind>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomView {
    pub code: String,
    pub state: RoomState,
    pub max_players: u8,
    pub roles: RoleConfig,
    pub countdown_remaining: u8,
    pub leader_revealed: bool,
    pub players: Vec<PlayerView>,
    /// The caller's seat, if their membership cookie is valid.
    pub you: Option<PlayerId>,
    /// The caller's own role, visible to them alone.
    pub your_role: Option<RoleKind>,
    pub start_issues: Vec<String>,
}

impl RoomView {
    fn new(room: &Room, viewer: Option<&str>) -> Self {
        let players = room
            .players_by_join_order()
            .into_iter()
            .map(|p| PlayerView {
                id: p.id.clone(),
                name: p.name.clone(),
                is_host: p.is_host,
                role: p
                    .role
                    .filter(|r| p.role_revealed || (room.leader_revealed && *r == RoleKind::Leader)),
            })
            .collect();
        let you = viewer.filter(|id| room.is_member(id)).map(str::to_string);
        let your_role = you.as_deref().and_then(|id| room.player(id)).and_then(|p| p.role);
        Self {
            code: room.code.clone(),
            state: room.state,
            max_players: room.max_players,
            roles: room.roles.clone(),
            countdown_remaining: room.countdown_remaining,
            leader_revealed: room.leader_revealed,
            players,
            you,
            your_role,
            start_issues: room.start_issues(),
        }
    }
}

fn room_code(raw: &str) -> Result<String, AppError> {
    let code = raw.trim().to_ascii_uppercase();
    if !is_valid_room_code(&code) {
        return Err(AppError::BadRequest(format!("Invalid room code: {raw}")));
    }
    Ok(code)
}

/// Player id from the room's membership cookie.
fn viewer(state: &AppState, headers: &HeaderMap, code: &str) -> Result<PlayerId, AppError> {
    membership_from_headers(&state.signer, headers, code)
        .ok_or_else(|| AppError::Unauthorized("Missing or invalid membership".to_string()))
}

/// The caller's browser session id, and whether it was just minted.
fn session_id(headers: &HeaderMap) -> (String, bool) {
    match cookie_value(headers, SESSION_COOKIE) {
        Some(id) if !id.is_empty() && id.len() <= MAX_SESSION_ID_LEN => (id, false),
        _ => (uuid::Uuid::new_v4().to_string(), true),
    }
}

fn with_cookies(mut response: Response, cookies: &[String]) -> Result<Response, AppError> {
    for cookie in cookies {
        let value = HeaderValue::from_str(cookie)
            .map_err(|e| AppError::Internal(format!("invalid cookie header: {e}")))?;
        response.headers_mut().append(SET_COOKIE, value);
    }
    Ok(response)
}

fn seat_cookies(state: &AppState, code: &str, player_id: &str, session: &(String, bool)) -> Vec<String> {
    let mut cookies = vec![membership_set_cookie(code, &state.signer.issue(code, player_id))];
    if session.1 {
        cookies.push(session_set_cookie(&session.0));
    }
    cookies
}

/// POST /api/rooms: open a room with the caller seated as host.
pub async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NameBody>,
) -> Result<Response, AppError> {
    let name = normalize_name(&body.name).ok_or(RoomError::InvalidName)?;
    let session = session_id(&headers);

    let room = state.repo.create().await?;
    let player = Player::new(name.clone(), session.0.clone());
    let player_id = player.id.clone();
    let code = room.code.clone();
    state.repo.modify(&code, |r| r.add_player(player)).await?;
    state.notifier.publish(
        &code,
        EventKind::PlayerJoined {
            player_id: player_id.clone(),
            name,
        },
    );
    tracing::info!(room = %code, player_id = %player_id, "Room created");

    let cookies = seat_cookies(&state, &code, &player_id, &session);
    let body = SeatResponse {
        redirect: format!("/rooms/{code}/lobby"),
        room_code: code,
        player_id,
        is_host: true,
    };
    with_cookies((StatusCode::CREATED, Json(body)).into_response(), &cookies)
}

/// POST /api/rooms/{code}/join. A browser session that already holds a
/// seat gets it back instead of a second one.
pub async fn join_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(body): Json<NameBody>,
) -> Result<Response, AppError> {
    let code = room_code(&code)?;
    let name = normalize_name(&body.name).ok_or(RoomError::InvalidName)?;
    let session = session_id(&headers);

    let ((player_id, joined), room) = state
        .repo
        .modify(&code, |room| {
            if let Some(existing) = room.player_for_session(&session.0) {
                return Ok((existing.id.clone(), false));
            }
            let player = Player::new(name.clone(), session.0.clone());
            let id = player.id.clone();
            room.add_player(player)?;
            Ok((id, true))
        })
        .await?;

    if joined {
        state.notifier.publish(
            &code,
            EventKind::PlayerJoined {
                player_id: player_id.clone(),
                name,
            },
        );
        tracing::info!(room = %code, player_id = %player_id, "Player joined");
    } else {
        tracing::debug!(room = %code, player_id = %player_id, "Session already seated");
    }

    let cookies = seat_cookies(&state, &code, &player_id, &session);
    let body = SeatResponse {
        is_host: room.player(&player_id).is_some_and(|p| p.is_host),
        redirect: format!("/rooms/{code}/lobby"),
        room_code: code,
        player_id,
    };
    let status = if joined { StatusCode::CREATED } else { StatusCode::OK };
    with_cookies((status, Json(body)).into_response(), &cookies)
}

/// POST /api/rooms/{code}/leave
pub async fn leave_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let code = room_code(&code)?;
    let player_id = viewer(&state, &headers, &code)?;

    let ((_, new_host), _) = state
        .repo
        .modify(&code, |room| room.remove_player(&player_id))
        .await?;
    state.notifier.publish(
        &code,
        EventKind::PlayerLeft {
            player_id: player_id.clone(),
            new_host: new_host.clone(),
        },
    );
    tracing::info!(room = %code, player_id = %player_id, new_host = ?new_host, "Player left");

    let body = RedirectResponse {
        redirect: "/".to_string(),
    };
    with_cookies(Json(body).into_response(), &[membership_clear_cookie(&code)])
}

/// PUT /api/rooms/{code}/roles: host only, lobby only.
pub async fn update_roles(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RolesBody>,
) -> Result<Json<RoomView>, AppError> {
    let code = room_code(&code)?;
    let player_id = viewer(&state, &headers, &code)?;

    let ((), room) = state
        .repo
        .modify(&code, |room| {
            room.require_host(&player_id)?;
            room.configure(body.max_players, body.roles)
        })
        .await?;
    state.notifier.publish(
        &code,
        EventKind::RoleConfigUpdated {
            max_players: room.max_players,
            roles: room.roles.clone(),
        },
    );
    tracing::info!(room = %code, max_players = room.max_players, "Role config updated");

    Ok(Json(RoomView::new(&room, Some(&player_id))))
}

/// POST /api/rooms/{code}/start: deal roles and begin the countdown.
pub async fn start_game(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StartResponse>, AppError> {
    let code = room_code(&code)?;
    let player_id = viewer(&state, &headers, &code)?;

    let ((), room) = state
        .repo
        .modify(&code, |room| {
            room.require_host(&player_id)?;
            room.start(&mut rand::rng())
        })
        .await
        .inspect_err(|e| {
            if let RoomError::StartBlocked(issues) = e {
                tracing::debug!(room = %code, ?issues, "Start refused");
            }
        })?;

    let started_at = room.started_at.unwrap_or_else(std::time::SystemTime::now);
    state
        .notifier
        .publish(&code, EventKind::GameStarted { started_at });
    state.countdown.spawn(&code);
    tracing::info!(room = %code, players = room.players.len(), "Game started");

    Ok(Json(StartResponse {
        state: room.state,
        countdown_remaining: room.countdown_remaining,
        redirect: format!("/rooms/{code}/game"),
    }))
}

/// POST /api/rooms/{code}/reveal: show the caller's own card to the table.
pub async fn reveal_role(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RevealResponse>, AppError> {
    let code = room_code(&code)?;
    let player_id = viewer(&state, &headers, &code)?;

    let (changed, room) = state
        .repo
        .modify(&code, |room| room.reveal_role(&player_id))
        .await?;
    if changed {
        state.notifier.publish(
            &code,
            EventKind::RoleRevealed {
                player_id: player_id.clone(),
            },
        );
    }

    let role = room
        .player(&player_id)
        .and_then(|p| p.role)
        .ok_or_else(|| AppError::Conflict("No role was dealt to this player".to_string()))?;
    Ok(Json(RevealResponse {
        role,
        team: role.team(),
    }))
}

/// GET /api/rooms/{code}
pub async fn get_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RoomView>, AppError> {
    let code = room_code(&code)?;
    let room = state.repo.get(&code).await?;
    let caller = membership_from_headers(&state.signer, &headers, &code);
    Ok(Json(RoomView::new(&room, caller.as_deref())))
}
