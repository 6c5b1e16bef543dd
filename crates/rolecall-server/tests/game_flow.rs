#[allow(dead_code)]
mod common;

use std::time::Duration;

use rolecall_core::room::RoomState;

use common::{Browser, TestServer, create_room, join_room};

#[tokio::test]
async fn four_players_start_and_reach_playing() {
    let server = TestServer::with_fast_countdown(50).await;
    let mut host = Browser::new();
    let (code, _) = create_room(&server, &mut host, "Alice").await;

    let mut guests = Vec::new();
    for name in ["Bob", "Carol", "Dave"] {
        let mut b = Browser::new();
        let id = join_room(&server, &mut b, &code, name).await;
        guests.push((b, id));
    }

    let resp = host
        .post(&server.url(&format!("/api/rooms/{code}/start")), serde_json::json!({}))
        .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["state"], "countdown");
    assert_eq!(body["countdown_remaining"], 5);
    assert_eq!(body["redirect"], format!("/rooms/{code}/game"));

    // Roster is frozen once the countdown begins.
    let mut late = Browser::new();
    let resp = late
        .post(
            &server.url(&format!("/api/rooms/{code}/join")),
            serde_json::json!({ "name": "Eve" }),
        )
        .await;
    assert_eq!(resp.status(), 409);

    let mut playing = None;
    for _ in 0..100 {
        let room = server.state.repo.get(&code).await.unwrap();
        // The task deregisters only after its final publish.
        if room.state == RoomState::Playing && !server.state.countdown.is_running(&code) {
            playing = Some(room);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let room = playing.expect("room should reach Playing");
    assert!(room.leader_revealed);
    assert_eq!(room.countdown_remaining, 0);
    assert_eq!(room.players.len(), 4);
    assert!(room.players.values().all(|p| p.role.is_some()));

    // Five countdown updates then game_playing, in id order.
    let events = server.state.log.recent(&code, 100);
    let kinds: Vec<&str> = events.iter().rev().map(|e| e.event.event_type()).collect();
    let tail: Vec<&str> = kinds.iter().rev().take(7).rev().copied().collect();
    assert_eq!(
        tail,
        vec![
            "game_started",
            "countdown_update",
            "countdown_update",
            "countdown_update",
            "countdown_update",
            "countdown_update",
            "game_playing",
        ]
    );
}

#[tokio::test]
async fn revealed_role_becomes_public() {
    let server = TestServer::with_fast_countdown(20).await;
    let mut host = Browser::new();
    let (code, _) = create_room(&server, &mut host, "Alice").await;
    let mut bob = Browser::new();
    let bob_id = join_room(&server, &mut bob, &code, "Bob").await;
    for name in ["Carol", "Dave"] {
        let mut b = Browser::new();
        join_room(&server, &mut b, &code, name).await;
    }

    // Revealing before play is not allowed.
    let resp = bob
        .post(&server.url(&format!("/api/rooms/{code}/reveal")), serde_json::json!({}))
        .await;
    assert_eq!(resp.status(), 422);

    let resp = host
        .post(&server.url(&format!("/api/rooms/{code}/start")), serde_json::json!({}))
        .await;
    assert_eq!(resp.status(), 200);

    for _ in 0..100 {
        let room = server.state.repo.get(&code).await.unwrap();
        if room.state == RoomState::Playing && !server.state.countdown.is_running(&code) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let resp = bob
        .post(&server.url(&format!("/api/rooms/{code}/reveal")), serde_json::json!({}))
        .await;
    assert_eq!(resp.status(), 200);
    let revealed: serde_json::Value = resp.json().await.unwrap();
    let role = revealed["role"].as_str().unwrap().to_string();

    let mut stranger = Browser::new();
    let resp = stranger.get(&server.url(&format!("/api/rooms/{code}"))).await;
    let view: serde_json::Value = resp.json().await.unwrap();
    let bob_view = view["players"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["id"] == bob_id.as_str())
        .unwrap();
    assert_eq!(bob_view["role"], role.as_str());
    assert!(view["your_role"].is_null());

    let last = server.state.log.recent(&code, 1);
    assert_eq!(last[0].event.event_type(), "role_revealed");
}
