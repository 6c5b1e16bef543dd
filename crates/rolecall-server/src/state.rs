use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::auth::MembershipSigner;
use crate::bus::EventBus;
use crate::config::ServerConfig;
use crate::countdown::CountdownSynchronizer;
use crate::event_log::EventLog;
use crate::notifier::Notifier;
use crate::registry::ConnectionRegistry;
use crate::render::{HtmlRenderer, Renderer};
use crate::repository::RoomRepository;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<RoomRepository>,
    pub bus: Arc<EventBus>,
    pub log: Arc<EventLog>,
    pub notifier: Notifier,
    pub registry: Arc<ConnectionRegistry>,
    pub countdown: Arc<CountdownSynchronizer>,
    pub signer: MembershipSigner,
    pub renderer: Arc<dyn Renderer>,
    pub config: Arc<ServerConfig>,
    /// Cancelled on graceful shutdown; streaming sessions end when it fires.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let repo = Arc::new(RoomRepository::new(&config.rooms));
        let bus = Arc::new(EventBus::new(config.limits.subscriber_buffer));
        let log = Arc::new(EventLog::with_capacity(config.limits.event_log_capacity));
        let notifier = Notifier::new(Arc::clone(&bus), Arc::clone(&log));
        let countdown = Arc::new(CountdownSynchronizer::new(
            Arc::clone(&repo),
            notifier.clone(),
            Duration::from_millis(config.rooms.countdown_tick_millis),
        ));
        let signer = match &config.auth.membership_secret {
            Some(secret) if !secret.is_empty() => MembershipSigner::new(secret.as_bytes()),
            _ => MembershipSigner::random(),
        };
        Self {
            repo,
            bus,
            log,
            notifier,
            registry: Arc::new(ConnectionRegistry::new()),
            countdown,
            signer,
            renderer: Arc::new(HtmlRenderer),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }
}
