use serde::Deserialize;

use rolecall_core::roles::{MAX_PLAYERS, MIN_PLAYERS};
use rolecall_core::room::DEFAULT_MAX_PLAYERS;

/// Top-level server configuration, loaded from `rolecall.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub web_root: String,
    pub auth: AuthFileConfig,
    pub limits: LimitsConfig,
    pub rooms: RoomsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            web_root: "web".to_string(),
            auth: AuthFileConfig::default(),
            limits: LimitsConfig::default(),
            rooms: RoomsConfig::default(),
        }
    }
}

/// Buffer sizes and streaming timings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Per-subscriber inbox capacity on the event bus. Events beyond this
    /// are dropped for that subscriber.
    pub subscriber_buffer: usize,
    /// Recent events retained per room for `Last-Event-ID` replay.
    pub event_log_capacity: usize,
    pub heartbeat_interval_secs: u64,
    /// Outbound SSE frames buffered per connection.
    pub session_buffer: usize,
    /// Timeout for non-streaming API requests.
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 10,
            event_log_capacity: 100,
            heartbeat_interval_secs: 30,
            session_buffer: 32,
            request_timeout_secs: 10,
        }
    }
}

/// Room lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    pub default_max_players: u8,
    /// Attempts at drawing an unused room code before giving up.
    pub code_attempts: usize,
    pub countdown_tick_millis: u64,
    /// Rooms idle longer than this are removed. 0 disables the reaper.
    pub idle_timeout_secs: u64,
    pub idle_check_interval_secs: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            default_max_players: DEFAULT_MAX_PLAYERS,
            code_attempts: 10,
            countdown_tick_millis: 1000,
            idle_timeout_secs: 0,
            idle_check_interval_secs: 60,
        }
    }
}

/// Auth section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    /// HMAC key for membership cookies. Random per process when unset,
    /// which invalidates all cookies on restart (rooms are lost anyway).
    pub membership_secret: Option<String>,
}

impl ServerConfig {
    /// Validate configuration, logging problems. Exits on fatal ones.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(
                addr = %self.listen_addr,
                "listen_addr is not a valid socket address"
            );
            std::process::exit(1);
        }

        if self.auth.membership_secret.is_some() {
            tracing::warn!(
                "membership_secret is set in config file, use ROLECALL_MEMBERSHIP_SECRET env var in production"
            );
        }

        if let Err(msg) = self.check_limits() {
            tracing::error!("{msg}");
            std::process::exit(1);
        }
    }

    /// Non-exiting half of `validate`, for the numeric limits.
    pub fn check_limits(&self) -> Result<(), String> {
        if self.limits.subscriber_buffer == 0 {
            return Err("limits.subscriber_buffer must be > 0".to_string());
        }
        if self.limits.event_log_capacity == 0 {
            return Err("limits.event_log_capacity must be > 0".to_string());
        }
        if self.limits.heartbeat_interval_secs == 0 {
            return Err("limits.heartbeat_interval_secs must be > 0".to_string());
        }
        if self.limits.session_buffer == 0 {
            return Err("limits.session_buffer must be > 0".to_string());
        }
        if self.limits.request_timeout_secs == 0 {
            return Err("limits.request_timeout_secs must be > 0".to_string());
        }
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&self.rooms.default_max_players) {
            return Err(format!(
                "rooms.default_max_players must be between {MIN_PLAYERS} and {MAX_PLAYERS}"
            ));
        }
        if self.rooms.code_attempts == 0 {
            return Err("rooms.code_attempts must be > 0".to_string());
        }
        if self.rooms.countdown_tick_millis == 0 {
            return Err("rooms.countdown_tick_millis must be > 0".to_string());
        }
        if self.rooms.idle_timeout_secs > 0 && self.rooms.idle_check_interval_secs == 0 {
            return Err("rooms.idle_check_interval_secs must be > 0".to_string());
        }
        Ok(())
    }

    /// Load config from `rolecall.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("rolecall.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from rolecall.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse rolecall.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No rolecall.toml found, using defaults");
                ServerConfig::default()
            },
        };

        if let Ok(addr) = std::env::var("ROLECALL_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }
        if let Ok(root) = std::env::var("ROLECALL_WEB_ROOT")
            && !root.is_empty()
        {
            config.web_root = root;
        }
        if let Ok(secret) = std::env::var("ROLECALL_MEMBERSHIP_SECRET")
            && !secret.is_empty()
        {
            config.auth.membership_secret = Some(secret);
        }
        if let Ok(val) = std::env::var("ROLECALL_HEARTBEAT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.limits.heartbeat_interval_secs = n;
        }
        if let Ok(val) = std::env::var("ROLECALL_IDLE_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.rooms.idle_timeout_secs = n;
        }

        config
    }
}
