//! Long-lived Server-Sent Events sessions for the lobby and game screens.

pub mod frame;
pub mod session;

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, Sse};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use rolecall_core::player::PlayerId;
use rolecall_core::room::is_valid_room_code;

use crate::auth::membership_from_headers;
use crate::error::AppError;
use crate::state::AppState;

use session::{Session, SessionGuard, SessionKind};

pub type FrameStream = ReceiverStream<Result<SseEvent, Infallible>>;

/// GET /rooms/{code}/lobby/stream
pub async fn lobby_stream(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<FrameStream>, AppError> {
    open_session(state, code, &headers, SessionKind::Lobby).await
}

/// GET /rooms/{code}/game/stream
pub async fn game_stream(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<FrameStream>, AppError> {
    open_session(state, code, &headers, SessionKind::Game).await
}

/// Check the room exists and the caller holds a seat in it. Runs before
/// anything is subscribed or counted.
async fn admit(state: &AppState, code: &str, headers: &HeaderMap) -> Result<PlayerId, AppError> {
    if !is_valid_room_code(code) {
        return Err(AppError::BadRequest(format!("Invalid room code: {code}")));
    }
    let room = state.repo.get(code).await?;
    let player_id = membership_from_headers(&state.signer, headers, code)
        .ok_or_else(|| AppError::Unauthorized("Missing or invalid membership".to_string()))?;
    if !room.is_member(&player_id) {
        return Err(AppError::Unauthorized("Not a member of this room".to_string()));
    }
    Ok(player_id)
}

async fn open_session(
    state: AppState,
    code: String,
    headers: &HeaderMap,
    kind: SessionKind,
) -> Result<Sse<FrameStream>, AppError> {
    let code = code.to_ascii_uppercase();
    let viewer = admit(&state, &code, headers).await.inspect_err(|e| {
        tracing::debug!(room = %code, error = %e, "Stream admission refused");
    })?;

    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let sub = state.bus.subscribe(&code);
    let guard = SessionGuard::new(
        Arc::clone(&state.bus),
        &code,
        sub.id,
        state.registry.open(&code),
    );
    let (tx, rx) = mpsc::channel(state.config.limits.session_buffer.max(1));
    let session = Session::new(state, kind, code, viewer, tx);
    tokio::spawn(session.run(sub, last_event_id, guard));

    Ok(Sse::new(ReceiverStream::new(rx)))
}
