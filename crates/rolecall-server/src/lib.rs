pub mod api;
pub mod auth;
pub mod bus;
pub mod config;
pub mod countdown;
pub mod error;
pub mod event_log;
pub mod health;
pub mod notifier;
pub mod registry;
pub mod render;
pub mod repository;
pub mod sse;
pub mod state;

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;

use config::ServerConfig;
use state::AppState;

/// Build the Axum router and application state from a config.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    let web_root = config.web_root.clone();
    let request_timeout = Duration::from_secs(config.limits.request_timeout_secs);
    let state = AppState::new(config);

    // Short-lived JSON calls get a timeout; the streams below must not.
    let api_routes = Router::new()
        .route("/rooms", post(api::create_room))
        .route("/rooms/{code}", get(api::get_room))
        .route("/rooms/{code}/join", post(api::join_room))
        .route("/rooms/{code}/leave", post(api::leave_room))
        .route("/rooms/{code}/roles", put(api::update_roles))
        .route("/rooms/{code}/start", post(api::start_game))
        .route("/rooms/{code}/reveal", post(api::reveal_role))
        .layer(TimeoutLayer::new(request_timeout));

    let app = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/rooms/{code}/lobby/stream", get(sse::lobby_stream))
        .route("/rooms/{code}/game/stream", get(sse::game_stream))
        .nest("/api", api_routes)
        .fallback_service(ServeDir::new(&web_root))
        .with_state(state.clone());

    (app, state)
}

/// Periodically drop rooms nobody has touched for `rooms.idle_timeout_secs`.
/// Does nothing when that is 0.
pub fn spawn_idle_reaper(state: AppState) {
    let idle_secs = state.config.rooms.idle_timeout_secs;
    if idle_secs == 0 {
        return;
    }
    let max_idle = Duration::from_secs(idle_secs);
    let period = Duration::from_secs(state.config.rooms.idle_check_interval_secs.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                () = state.shutdown.cancelled() => break,
                _ = ticker.tick() => {},
            }
            for code in state.repo.remove_idle(max_idle).await {
                reap_room(&state, &code);
            }
        }
    });
}

/// Release everything held for a room that was removed from the repository.
fn reap_room(state: &AppState, code: &str) {
    state.countdown.cancel(code);
    state.bus.close_room(code);
    state.log.forget(code);
    tracing::info!(room = code, "Reaped idle room");
}
