use std::net::SocketAddr;
use std::time::Duration;

use reqwest::header::{COOKIE, SET_COOKIE};

use rolecall_server::build_app;
use rolecall_server::config::{RoomsConfig, ServerConfig};
use rolecall_server::state::AppState;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::from_config(ServerConfig::default()).await
    }

    /// Server whose countdown ticks every `tick_millis` instead of every second.
    pub async fn with_fast_countdown(tick_millis: u64) -> Self {
        let config = ServerConfig {
            rooms: RoomsConfig {
                countdown_tick_millis: tick_millis,
                ..RoomsConfig::default()
            },
            ..ServerConfig::default()
        };
        Self::from_config(config).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app(config);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url())
    }
}

/// A browser: an HTTP client plus the cookies the server has set on it.
pub struct Browser {
    pub client: reqwest::Client,
    cookies: Vec<(String, String)>,
}

impl Default for Browser {
    fn default() -> Self {
        Self::new()
    }
}

impl Browser {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            cookies: Vec::new(),
        }
    }

    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Apply `Set-Cookie` headers. An empty value removes the cookie.
    pub fn absorb(&mut self, resp: &reqwest::Response) {
        for header in resp.headers().get_all(SET_COOKIE) {
            let Ok(raw) = header.to_str() else { continue };
            let pair = raw.split(';').next().unwrap_or_default();
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            self.cookies.retain(|(k, _)| k != name);
            if !value.is_empty() {
                self.cookies.push((name.to_string(), value.to_string()));
            }
        }
    }

    pub async fn get(&mut self, url: &str) -> reqwest::Response {
        let resp = self
            .client
            .get(url)
            .header(COOKIE, self.cookie_header())
            .send()
            .await
            .unwrap();
        self.absorb(&resp);
        resp
    }

    pub async fn post(&mut self, url: &str, body: serde_json::Value) -> reqwest::Response {
        let resp = self
            .client
            .post(url)
            .header(COOKIE, self.cookie_header())
            .json(&body)
            .send()
            .await
            .unwrap();
        self.absorb(&resp);
        resp
    }

    pub async fn put(&mut self, url: &str, body: serde_json::Value) -> reqwest::Response {
        let resp = self
            .client
            .put(url)
            .header(COOKIE, self.cookie_header())
            .json(&body)
            .send()
            .await
            .unwrap();
        self.absorb(&resp);
        resp
    }
}

/// Create a room as `name`. Returns the room code and the host's player id.
pub async fn create_room(server: &TestServer, browser: &mut Browser, name: &str) -> (String, String) {
    let resp = browser
        .post(&server.url("/api/rooms"), serde_json::json!({ "name": name }))
        .await;
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    (
        body["room_code"].as_str().unwrap().to_string(),
        body["player_id"].as_str().unwrap().to_string(),
    )
}

/// Join `code` as `name`, returning the new player id.
pub async fn join_room(server: &TestServer, browser: &mut Browser, code: &str, name: &str) -> String {
    let resp = browser
        .post(
            &server.url(&format!("/api/rooms/{code}/join")),
            serde_json::json!({ "name": name }),
        )
        .await;
    assert!(resp.status().is_success(), "join failed: {}", resp.status());
    let body: serde_json::Value = resp.json().await.unwrap();
    body["player_id"].as_str().unwrap().to_string()
}

/// Read SSE chunks until `needle` shows up or the timeout passes. Returns
/// everything read.
pub async fn read_until(resp: &mut reqwest::Response, needle: &str, timeout: Duration) -> String {
    let mut collected = String::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(Some(bytes)) = resp.chunk().await {
            collected.push_str(&String::from_utf8_lossy(&bytes));
            if collected.contains(needle) {
                return;
            }
        }
    })
    .await;
    collected
}
