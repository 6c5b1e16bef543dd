#[allow(dead_code)]
mod common;

use std::time::Duration;

use reqwest::header::COOKIE;
use rolecall_server::config::{LimitsConfig, ServerConfig};

use common::{Browser, TestServer, create_room, join_room, read_until};

async fn open_stream(
    server: &TestServer,
    browser: &Browser,
    path: &str,
    last_event_id: Option<&str>,
) -> reqwest::Response {
    let mut req = browser
        .client
        .get(server.url(path))
        .header(COOKIE, browser.cookie_header());
    if let Some(id) = last_event_id {
        req = req.header("last-event-id", id);
    }
    req.send().await.unwrap()
}

/// A room with `n` seated players; index 0 is the host.
async fn seated_room(server: &TestServer, n: usize) -> (String, Vec<Browser>) {
    let mut browsers = vec![Browser::new()];
    let (code, _) = create_room(server, &mut browsers[0], "Host").await;
    for i in 1..n {
        let mut b = Browser::new();
        join_room(server, &mut b, &code, &format!("Player{i}")).await;
        browsers.push(b);
    }
    (code, browsers)
}

#[tokio::test]
async fn stream_without_membership_is_401() {
    let server = TestServer::new().await;
    let (code, _) = seated_room(&server, 1).await;

    let resp = reqwest::get(server.url(&format!("/rooms/{code}/lobby/stream")))
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(server.state.registry.total(), 0);
    assert_eq!(server.state.bus.subscriber_count(&code), 0);
}

#[tokio::test]
async fn stream_for_unknown_room_is_404() {
    let server = TestServer::new().await;
    let resp = reqwest::get(server.url("/rooms/ZZZZZ/game/stream"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = reqwest::get(server.url("/rooms/bad!/game/stream"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn lobby_stream_pushes_player_list_on_join() {
    let server = TestServer::new().await;
    let (code, browsers) = seated_room(&server, 1).await;

    let mut stream = open_stream(&server, &browsers[0], &format!("/rooms/{code}/lobby/stream"), None).await;
    assert_eq!(stream.status(), 200);
    assert_eq!(
        stream.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let joiner_url = server.url(&format!("/api/rooms/{code}/join"));
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut bob = Browser::new();
        let _ = bob
            .post(&joiner_url, serde_json::json!({ "name": "Bob" }))
            .await;
    });

    let collected = read_until(&mut stream, "Bob", Duration::from_secs(3)).await;
    assert!(collected.contains("event: datastar-merge-fragments"), "got: {collected}");
    assert!(collected.contains("selector #player-list"), "got: {collected}");
    assert!(collected.contains("Bob"), "got: {collected}");
}

#[tokio::test]
async fn lobby_stream_redirects_and_closes_on_start() {
    let server = TestServer::new().await;
    let (code, mut browsers) = seated_room(&server, 4).await;

    let mut stream = open_stream(&server, &browsers[1], &format!("/rooms/{code}/lobby/stream"), None).await;
    assert_eq!(stream.status(), 200);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let resp = browsers[0]
        .post(&server.url(&format!("/api/rooms/{code}/start")), serde_json::json!({}))
        .await;
    assert_eq!(resp.status(), 200);

    let target = format!("/rooms/{code}/game");
    let collected = read_until(&mut stream, &target, Duration::from_secs(3)).await;
    assert!(collected.contains("datastar-execute-script"), "got: {collected}");
    assert!(collected.contains(&target), "got: {collected}");

    // The server ends the response after the redirect.
    let end = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match stream.chunk().await {
                Ok(Some(_)) => continue,
                _ => return,
            }
        }
    })
    .await;
    assert!(end.is_ok(), "lobby stream should close after redirect");
}

#[tokio::test]
async fn reconnect_replays_missed_events() {
    let server = TestServer::new().await;
    let (code, browsers) = seated_room(&server, 1).await;

    // Event 1 was the host joining; Bob's join becomes event 2.
    let mut bob = Browser::new();
    join_room(&server, &mut bob, &code, "Bob").await;

    let mut stream = open_stream(
        &server,
        &browsers[0],
        &format!("/rooms/{code}/lobby/stream"),
        Some("1"),
    )
    .await;
    assert_eq!(stream.status(), 200);

    let collected = read_until(&mut stream, "Bob", Duration::from_secs(3)).await;
    assert!(collected.contains("selector #player-list"), "got: {collected}");
    assert!(
        collected.contains("id: 2") || collected.contains("id:2"),
        "replayed frame should carry its event id, got: {collected}"
    );
}

#[tokio::test]
async fn game_stream_renders_then_follows_countdown() {
    let server = TestServer::with_fast_countdown(100).await;
    let (code, mut browsers) = seated_room(&server, 4).await;

    let resp = browsers[0]
        .post(&server.url(&format!("/api/rooms/{code}/start")), serde_json::json!({}))
        .await;
    assert_eq!(resp.status(), 200);

    let mut stream = open_stream(&server, &browsers[2], &format!("/rooms/{code}/game/stream"), None).await;
    assert_eq!(stream.status(), 200);

    let collected = read_until(&mut stream, "data-state=\"playing\"", Duration::from_secs(5)).await;
    assert!(collected.contains("selector #game"), "got: {collected}");
    assert!(collected.contains("data-state=\"playing\""), "got: {collected}");
}

#[tokio::test]
async fn closed_streams_release_their_slot() {
    // A short heartbeat makes the server notice the dead socket quickly.
    let config = ServerConfig {
        limits: LimitsConfig {
            heartbeat_interval_secs: 1,
            ..LimitsConfig::default()
        },
        ..ServerConfig::default()
    };
    let server = TestServer::from_config(config).await;
    let (code, browsers) = seated_room(&server, 1).await;

    let stream = open_stream(&server, &browsers[0], &format!("/rooms/{code}/lobby/stream"), None).await;
    assert_eq!(stream.status(), 200);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.state.registry.total(), 1);
    assert_eq!(server.state.bus.subscriber_count(&code), 1);

    drop(stream);

    let mut released = false;
    for _ in 0..300 {
        if server.state.registry.total() == 0 {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(released, "registry should drop the closed session");
    assert_eq!(server.state.bus.subscriber_count(&code), 0);
}
