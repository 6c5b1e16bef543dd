use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::event_log::EventLogStats;
use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: ConnectionInfo,
    pub rooms: RoomInfo,
    pub events: EventLogStats,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    pub sse: usize,
}

#[derive(Serialize)]
pub struct RoomInfo {
    pub active: usize,
    pub players: usize,
}

/// Server status, live stream count and room totals as JSON.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (active_rooms, total_players) = state.repo.stats().await;

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        connections: ConnectionInfo {
            sse: state.registry.total(),
        },
        rooms: RoomInfo {
            active: active_rooms,
            players: total_players,
        },
        events: state.log.stats(),
    })
}

/// Readiness check: refuses once shutdown has begun.
pub async fn readiness_check(State(state): State<AppState>) -> &'static str {
    if state.shutdown.is_cancelled() {
        return "not ready: shutting down";
    }
    "ready"
}
