use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::response::sse::Event as SseEvent;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use rolecall_core::events::{Envelope, EventKind};
use rolecall_core::player::PlayerId;
use rolecall_core::room::{COUNTDOWN_SECONDS, Room, RoomError, RoomState};

use crate::bus::{EventBus, Subscription, SubscriptionId};
use crate::registry::ConnectionGuard;
use crate::render::RenderError;
use crate::sse::frame::Patch;
use crate::state::AppState;

pub type FrameSender = mpsc::Sender<Result<SseEvent, Infallible>>;

/// Which screen a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Lobby,
    Game,
}

impl SessionKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Lobby => "lobby",
            Self::Game => "game",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Releases a session's bus subscription and registry slot on every exit
/// path, including a panic inside the session task.
pub struct SessionGuard {
    bus: Arc<EventBus>,
    room_code: String,
    subscription: SubscriptionId,
    _connection: ConnectionGuard,
}

impl SessionGuard {
    pub fn new(
        bus: Arc<EventBus>,
        room_code: &str,
        subscription: SubscriptionId,
        connection: ConnectionGuard,
    ) -> Self {
        Self {
            bus,
            room_code: room_code.to_string(),
            subscription,
            _connection: connection,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.room_code, self.subscription);
        tracing::debug!(
            room = %self.room_code,
            subscription = self.subscription,
            "Session cleaned up"
        );
    }
}

/// One live streaming connection for a seated player.
pub struct Session {
    state: AppState,
    kind: SessionKind,
    room_code: String,
    viewer: PlayerId,
    out: FrameSender,
    /// Highest envelope id already pushed from the replay window.
    replayed_up_to: u64,
}

impl Session {
    pub fn new(
        state: AppState,
        kind: SessionKind,
        room_code: String,
        viewer: PlayerId,
        out: FrameSender,
    ) -> Self {
        Self {
            state,
            kind,
            room_code,
            viewer,
            out,
            replayed_up_to: 0,
        }
    }

    /// Drive the session until the client leaves, the server shuts down, or
    /// the screen no longer applies.
    pub async fn run(
        mut self,
        mut sub: Subscription,
        last_event_id: Option<String>,
        guard: SessionGuard,
    ) {
        let _guard = guard;
        tracing::info!(
            room = %self.room_code,
            player_id = %self.viewer,
            kind = self.kind.as_str(),
            "Streaming session opened"
        );

        if self.replay(last_event_id.as_deref()).await == Flow::Continue
            && self.initial().await == Flow::Continue
        {
            self.event_loop(&mut sub).await;
        }

        tracing::info!(
            room = %self.room_code,
            player_id = %self.viewer,
            kind = self.kind.as_str(),
            "Streaming session closed"
        );
    }

    async fn replay(&mut self, last_event_id: Option<&str>) -> Flow {
        let missed = self.state.log.events_since(&self.room_code, last_event_id);
        if !missed.is_empty() {
            tracing::debug!(
                room = %self.room_code,
                player_id = %self.viewer,
                count = missed.len(),
                "Replaying missed events"
            );
        }
        for envelope in missed {
            self.replayed_up_to = self.replayed_up_to.max(envelope.id);
            if self.on_event(&envelope).await == Flow::Close {
                return Flow::Close;
            }
        }
        Flow::Continue
    }

    async fn initial(&self) -> Flow {
        match self.kind {
            // The lobby page is rendered with current state; only deltas
            // follow, unless the room moved on before we subscribed.
            SessionKind::Lobby => {
                let Ok(room) = self.state.repo.get(&self.room_code).await else {
                    return self.redirect_home().await;
                };
                self.leave_lobby_if_done(&room, None).await
            },
            SessionKind::Game => {
                let room = match reconcile_countdown(&self.state, &self.room_code, SystemTime::now())
                    .await
                {
                    Ok(room) => room,
                    Err(_) => return self.redirect_home().await,
                };
                let html = self.state.renderer.game(&room, &self.viewer);
                self.push_rendered("#game", html, None, Patch::outer).await
            },
        }
    }

    async fn event_loop(&self, sub: &mut Subscription) {
        let period = Duration::from_secs(self.state.config.limits.heartbeat_interval_secs.max(1));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.state.shutdown.clone();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::debug!(room = %self.room_code, "Server shutting down, closing session");
                    return;
                },
                () = self.out.closed() => {
                    tracing::debug!(room = %self.room_code, player_id = %self.viewer, "Client disconnected");
                    return;
                },
                received = sub.recv() => {
                    let Some(envelope) = received else {
                        return;
                    };
                    if envelope.id <= self.replayed_up_to {
                        continue;
                    }
                    if self.on_event(&envelope).await == Flow::Close {
                        return;
                    }
                },
                _ = heartbeat.tick() => {
                    tracing::debug!(
                        room = %self.room_code,
                        room_connections = self.state.registry.room_count(&self.room_code),
                        total_connections = self.state.registry.total(),
                        "Heartbeat"
                    );
                    if self.send(Patch::Heartbeat, None).await == Flow::Close {
                        return;
                    }
                },
            }
        }
    }

    async fn on_event(&self, envelope: &Envelope) -> Flow {
        match self.kind {
            SessionKind::Lobby => self.on_lobby_event(envelope).await,
            SessionKind::Game => self.on_game_event(envelope).await,
        }
    }

    async fn on_lobby_event(&self, envelope: &Envelope) -> Flow {
        let Ok(room) = self.state.repo.get(&self.room_code).await else {
            return self.redirect_home().await;
        };
        let id = Some(envelope.id);
        if self.leave_lobby_if_done(&room, id).await == Flow::Close {
            return Flow::Close;
        }

        let renderer = Arc::clone(&self.state.renderer);
        match &envelope.event.kind {
            EventKind::PlayerJoined { .. } | EventKind::PlayerLeft { .. } => {
                let listed = self
                    .push_rendered("#player-list", renderer.player_list(&room), id, Patch::outer)
                    .await;
                if listed == Flow::Close {
                    return Flow::Close;
                }
                self.push_rendered(
                    "#start-panel",
                    renderer.start_panel(&room, &self.viewer),
                    id,
                    Patch::outer,
                )
                .await
            },
            EventKind::RoleConfigUpdated { .. } => {
                let configured = self
                    .push_rendered("#role-config", renderer.role_config(&room), id, Patch::outer)
                    .await;
                if configured == Flow::Close {
                    return Flow::Close;
                }
                self.push_rendered(
                    "#start-panel",
                    renderer.start_panel(&room, &self.viewer),
                    id,
                    Patch::outer,
                )
                .await
            },
            _ => Flow::Continue,
        }
    }

    /// Redirect away from a lobby the viewer no longer belongs on: home when
    /// they lost their seat, the game screen once the room left `Lobby`.
    async fn leave_lobby_if_done(&self, room: &Room, id: Option<u64>) -> Flow {
        if !room.is_member(&self.viewer) {
            return self.redirect_home().await;
        }
        if room.state != RoomState::Lobby {
            let target = format!("/rooms/{}/game", self.room_code);
            self.send(Patch::Redirect(target), id).await;
            return Flow::Close;
        }
        Flow::Continue
    }

    async fn on_game_event(&self, envelope: &Envelope) -> Flow {
        let Ok(room) = self.state.repo.get(&self.room_code).await else {
            return self.redirect_home().await;
        };

        let id = Some(envelope.id);
        let renderer = Arc::clone(&self.state.renderer);
        match &envelope.event.kind {
            // The payload may be stale by the time a slow inbox drains; the
            // stored room decides what is shown.
            EventKind::CountdownUpdate { .. } if room.state == RoomState::Countdown => {
                let remaining = i64::from(room.countdown_remaining)
                    .min(room.countdown_remaining_at(SystemTime::now()));
                self.push_rendered("#countdown", renderer.countdown(remaining), id, Patch::outer)
                    .await
            },
            EventKind::GameStarted { .. } => {
                self.push_rendered("#game", renderer.game(&room, &self.viewer), id, Patch::outer)
                    .await
            },
            EventKind::CountdownUpdate { .. }
            | EventKind::GamePlaying
            | EventKind::RoleRevealed { .. }
            | EventKind::PlayerJoined { .. }
            | EventKind::PlayerLeft { .. }
            | EventKind::RoleConfigUpdated { .. } => {
                self.push_rendered("#game", renderer.game(&room, &self.viewer), id, Patch::morph)
                    .await
            },
        }
    }

    /// Send a rendered fragment. A render failure is logged and skipped;
    /// only a gone client closes the session.
    async fn push_rendered(
        &self,
        selector: &'static str,
        html: Result<String, RenderError>,
        id: Option<u64>,
        patch: fn(&'static str, String) -> Patch,
    ) -> Flow {
        match html {
            Ok(html) => self.send(patch(selector, html), id).await,
            Err(e) => {
                tracing::warn!(
                    room = %self.room_code,
                    player_id = %self.viewer,
                    selector,
                    error = %e,
                    "Failed to render fragment"
                );
                Flow::Continue
            },
        }
    }

    async fn redirect_home(&self) -> Flow {
        self.send(Patch::Redirect("/".to_string()), None).await;
        Flow::Close
    }

    async fn send(&self, patch: Patch, id: Option<u64>) -> Flow {
        match self.out.send(Ok(patch.into_event(id))).await {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Close,
        }
    }
}

/// Fetch a room for a game screen, correcting the countdown for a viewer
/// who arrives part way through it.
///
/// The displayed remaining time is derived from `started_at` rather than
/// the stored counter. If the countdown should already be over, the room is
/// moved to `Playing` here and `game_playing` is published, without waiting
/// for the ticking task.
pub async fn reconcile_countdown(
    state: &AppState,
    room_code: &str,
    now: SystemTime,
) -> Result<Room, RoomError> {
    let mut room = state.repo.get(room_code).await?;
    if room.state != RoomState::Countdown {
        return Ok(room);
    }

    let remaining = room.countdown_remaining_at(now);
    if remaining > 0 {
        room.countdown_remaining = u8::try_from(remaining)
            .unwrap_or(COUNTDOWN_SECONDS)
            .min(COUNTDOWN_SECONDS);
        return Ok(room);
    }

    match state.repo.modify(room_code, Room::finish_countdown).await {
        Ok(((), playing)) => {
            state.countdown.cancel(room_code);
            state.notifier.publish(room_code, EventKind::GamePlaying);
            tracing::info!(room = room_code, "Countdown overdue, finished by late joiner");
            Ok(playing)
        },
        // Someone else moved it on between the read and the write.
        Err(RoomError::InvalidTransition { .. }) => state.repo.get(room_code).await,
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::config::ServerConfig;
    use crate::render::{HtmlRenderer, Renderer};
    use rolecall_core::test_helpers::make_room;

    async fn state_with_countdown_room(elapsed: Duration) -> (AppState, String) {
        let state = AppState::new(ServerConfig::default());
        let mut room = make_room("LATE1", 4);
        room.start(&mut rand::rng()).unwrap();
        room.started_at = SystemTime::now().checked_sub(elapsed);
        state.repo.update(room).await;
        (state, "LATE1".to_string())
    }

    #[tokio::test]
    async fn late_joiner_sees_true_remaining_time() {
        let (state, code) = state_with_countdown_room(Duration::from_secs(3)).await;
        let room = reconcile_countdown(&state, &code, SystemTime::now())
            .await
            .unwrap();
        assert_eq!(room.state, RoomState::Countdown);
        assert_eq!(room.countdown_remaining, 2);
    }

    #[tokio::test]
    async fn overdue_countdown_is_finished_and_published() {
        let (state, code) = state_with_countdown_room(Duration::from_secs(7)).await;
        let mut sub = state.bus.subscribe(&code);

        let room = reconcile_countdown(&state, &code, SystemTime::now())
            .await
            .unwrap();
        assert_eq!(room.state, RoomState::Playing);
        assert!(room.leader_revealed);
        assert_eq!(
            state.repo.get(&code).await.unwrap().state,
            RoomState::Playing
        );
        assert_eq!(sub.recv().await.unwrap().event.kind, EventKind::GamePlaying);

        // A second late joiner does not publish again.
        reconcile_countdown(&state, &code, SystemTime::now())
            .await
            .unwrap();
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn lobby_room_passes_through() {
        let state = AppState::new(ServerConfig::default());
        state.repo.update(make_room("LOBBY", 2)).await;
        let room = reconcile_countdown(&state, "LOBBY", SystemTime::now())
            .await
            .unwrap();
        assert_eq!(room.state, RoomState::Lobby);
    }

    fn frames(rx: &mut mpsc::Receiver<Result<SseEvent, Infallible>>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    #[tokio::test]
    async fn lobby_session_closes_when_game_starts() {
        let state = AppState::new(ServerConfig::default());
        let room = make_room("LOBBY", 4);
        let viewer = room.players_by_join_order()[1].id.clone();
        state.repo.update(room).await;

        let sub = state.bus.subscribe("LOBBY");
        let guard = SessionGuard::new(
            Arc::clone(&state.bus),
            "LOBBY",
            sub.id,
            state.registry.open("LOBBY"),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let session = Session::new(state.clone(), SessionKind::Lobby, "LOBBY".into(), viewer, tx);
        let task = tokio::spawn(session.run(sub, None, guard));
        tokio::task::yield_now().await;
        assert_eq!(state.registry.total(), 1);

        state
            .repo
            .modify("LOBBY", |r| r.start(&mut rand::rng()))
            .await
            .unwrap();
        state.notifier.publish(
            "LOBBY",
            EventKind::GameStarted {
                started_at: SystemTime::now(),
            },
        );

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("lobby session must close after redirect")
            .unwrap();
        assert_eq!(frames(&mut rx), 1);
        assert_eq!(state.registry.total(), 0);
        assert_eq!(state.bus.subscriber_count("LOBBY"), 0);
    }

    #[tokio::test]
    async fn game_session_dedupes_replayed_events() {
        let state = AppState::new(ServerConfig::default());
        let mut room = make_room("GAME1", 4);
        room.start(&mut rand::rng()).unwrap();
        let viewer = room.players_by_join_order()[0].id.clone();
        state.repo.update(room).await;

        // Subscribe before the events so they also land in the live inbox.
        let sub = state.bus.subscribe("GAME1");
        state
            .notifier
            .publish("GAME1", EventKind::CountdownUpdate { remaining: 4 });
        state
            .notifier
            .publish("GAME1", EventKind::CountdownUpdate { remaining: 3 });

        let guard = SessionGuard::new(
            Arc::clone(&state.bus),
            "GAME1",
            sub.id,
            state.registry.open("GAME1"),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let session = Session::new(state.clone(), SessionKind::Game, "GAME1".into(), viewer, tx);
        // Unknown marker: the whole window is replayed.
        let task = tokio::spawn(session.run(sub, Some("0".to_string()), guard));

        tokio::time::sleep(Duration::from_millis(50)).await;
        // two replayed countdown frames plus the initial game render
        assert_eq!(frames(&mut rx), 3);

        state.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("session must end on shutdown")
            .unwrap();
        assert_eq!(state.registry.total(), 0);
    }

    /// Debug output of an encoded frame carries its event name and data lines.
    fn text(frame: &Result<SseEvent, Infallible>) -> String {
        format!("{frame:?}")
    }

    fn spawn_session(
        state: &AppState,
        kind: SessionKind,
        code: &str,
        viewer: PlayerId,
    ) -> (
        tokio::task::JoinHandle<()>,
        mpsc::Receiver<Result<SseEvent, Infallible>>,
    ) {
        let sub = state.bus.subscribe(code);
        let guard = SessionGuard::new(
            Arc::clone(&state.bus),
            code,
            sub.id,
            state.registry.open(code),
        );
        let (tx, rx) = mpsc::channel(16);
        let session = Session::new(state.clone(), kind, code.to_string(), viewer, tx);
        (tokio::spawn(session.run(sub, None, guard)), rx)
    }

    #[tokio::test]
    async fn lobby_session_on_started_room_redirects_at_once() {
        let state = AppState::new(ServerConfig::default());
        let mut room = make_room("BEGUN", 4);
        room.start(&mut rand::rng()).unwrap();
        room.finish_countdown().unwrap();
        let viewer = room.players_by_join_order()[1].id.clone();
        state.repo.update(room).await;

        let (task, mut rx) = spawn_session(&state, SessionKind::Lobby, "BEGUN", viewer);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("lobby session must not outlive the lobby")
            .unwrap();

        let frame = rx.try_recv().unwrap();
        assert!(text(&frame).contains("datastar-execute-script"));
        assert!(text(&frame).contains("/rooms/BEGUN/game"));
        assert!(rx.try_recv().is_err());
        assert_eq!(state.registry.total(), 0);
        assert_eq!(state.bus.subscriber_count("BEGUN"), 0);
    }

    #[tokio::test]
    async fn lobby_session_for_removed_player_goes_home() {
        let state = AppState::new(ServerConfig::default());
        state.repo.update(make_room("SEATS", 2)).await;

        let (task, mut rx) = spawn_session(&state, SessionKind::Lobby, "SEATS", "ghost".into());
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("lobby session must close for a non-member")
            .unwrap();
        assert!(text(&rx.try_recv().unwrap()).contains("window.location.href = \\\"/\\\""));
    }

    #[tokio::test]
    async fn stale_countdown_update_rerenders_game_instead() {
        let state = AppState::new(ServerConfig::default());
        let mut room = make_room("STALE", 4);
        room.start(&mut rand::rng()).unwrap();
        room.finish_countdown().unwrap();
        let viewer = room.players_by_join_order()[0].id.clone();
        state.repo.update(room).await;

        let (task, mut rx) = spawn_session(&state, SessionKind::Game, "STALE", viewer);
        let initial = rx.recv().await.unwrap();
        assert!(text(&initial).contains("data-state=\\\"playing\\\""));

        state
            .notifier
            .publish("STALE", EventKind::CountdownUpdate { remaining: 3 });
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(text(&frame).contains("selector #game"));
        assert!(!text(&frame).contains("data-remaining"));

        state.shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn game_session_follows_roster_changes_before_start() {
        let state = AppState::new(ServerConfig::default());
        let room = make_room("EARLY", 3);
        let viewer = room.players_by_join_order()[0].id.clone();
        state.repo.update(room).await;

        let (task, mut rx) = spawn_session(&state, SessionKind::Game, "EARLY", viewer);
        let _initial = rx.recv().await.unwrap();

        state.notifier.publish(
            "EARLY",
            EventKind::PlayerJoined {
                player_id: "p-new".into(),
                name: "Newcomer".into(),
            },
        );
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(text(&frame).contains("mergeMode morph"));
        assert!(text(&frame).contains("data-state=\\\"lobby\\\""));

        state.shutdown.cancel();
        task.await.unwrap();
    }

    /// Fails its first render, then behaves like `HtmlRenderer`.
    #[derive(Default)]
    struct FlakyRenderer {
        failed: AtomicBool,
    }

    impl FlakyRenderer {
        fn check(&self) -> Result<(), RenderError> {
            if self.failed.swap(true, Ordering::SeqCst) {
                Ok(())
            } else {
                Err(RenderError::Format(std::fmt::Error))
            }
        }
    }

    impl Renderer for FlakyRenderer {
        fn player_list(&self, room: &Room) -> Result<String, RenderError> {
            self.check()?;
            HtmlRenderer.player_list(room)
        }

        fn role_config(&self, room: &Room) -> Result<String, RenderError> {
            self.check()?;
            HtmlRenderer.role_config(room)
        }

        fn start_panel(&self, room: &Room, viewer: &str) -> Result<String, RenderError> {
            self.check()?;
            HtmlRenderer.start_panel(room, viewer)
        }

        fn countdown(&self, remaining: i64) -> Result<String, RenderError> {
            self.check()?;
            HtmlRenderer.countdown(remaining)
        }

        fn game(&self, room: &Room, viewer: &str) -> Result<String, RenderError> {
            self.check()?;
            HtmlRenderer.game(room, viewer)
        }
    }

    #[tokio::test]
    async fn render_failure_is_skipped_and_session_keeps_going() {
        let mut state = AppState::new(ServerConfig::default());
        state.renderer = Arc::new(FlakyRenderer::default());
        let room = make_room("FLAKY", 3);
        let viewer = room.players_by_join_order()[0].id.clone();
        state.repo.update(room).await;

        // The initial game render fails and sends nothing.
        let (task, mut rx) = spawn_session(&state, SessionKind::Game, "FLAKY", viewer);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert!(!task.is_finished());

        state.notifier.publish(
            "FLAKY",
            EventKind::PlayerLeft {
                player_id: "p-gone".into(),
                new_host: None,
            },
        );
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(text(&frame).contains("selector #game"));
        assert!(!task.is_finished());
        assert_eq!(state.registry.total(), 1);

        state.shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_sends_heartbeat() {
        let state = AppState::new(ServerConfig::default());
        let room = make_room("QUIET", 2);
        let viewer = room.players_by_join_order()[0].id.clone();
        state.repo.update(room).await;

        let (task, mut rx) = spawn_session(&state, SessionKind::Lobby, "QUIET", viewer);
        let period = state.config.limits.heartbeat_interval_secs;

        tokio::time::sleep(Duration::from_secs(period - 1)).await;
        assert!(rx.try_recv().is_err());

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("heartbeat due")
            .unwrap();
        assert!(text(&frame).contains("datastar-execute-script"));
        assert!(text(&frame).contains("void 0"));
        assert!(!task.is_finished());

        state.shutdown.cancel();
        task.await.unwrap();
    }
}
