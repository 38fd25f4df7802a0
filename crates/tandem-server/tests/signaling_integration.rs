#[allow(dead_code)]
mod common;

use std::time::Duration;

use common::{
    READY, TestServer, connect_pair, ws_connect, ws_read_close_code, ws_read_text, ws_send_text,
    ws_try_read_text,
};
use futures::SinkExt;
use tokio_tungstenite::tungstenite::Message;

use tandem_server::config::ServerConfig;

#[tokio::test]
async fn second_peer_triggers_ready_for_both() {
    let server = TestServer::new().await;

    let mut a = ws_connect(&server.ws_url("abcd1234")).await;
    server.wait_for_peers(1).await;
    // Alone in the room: nothing yet
    assert!(ws_try_read_text(&mut a, 200).await.is_none());

    let mut b = ws_connect(&server.ws_url("abcd1234")).await;
    assert_eq!(ws_read_text(&mut a).await, READY);
    assert_eq!(ws_read_text(&mut b).await, READY);

    // Exactly once
    assert!(ws_try_read_text(&mut a, 200).await.is_none());
    assert!(ws_try_read_text(&mut b, 200).await.is_none());
}

#[tokio::test]
async fn offer_reaches_other_peer_unaltered_without_echo() {
    let server = TestServer::new().await;
    let (mut a, mut b) = connect_pair(&server, "abcd1234").await;

    let offer = r#"{"type":"offer","sdp":"v=0...","meta":{"z":1,"a":[1,2]}}"#;
    ws_send_text(&mut a, offer).await;
    assert_eq!(ws_read_text(&mut b).await, offer);
    assert!(ws_try_read_text(&mut a, 200).await.is_none());

    let answer = r#"{"type":"answer","sdp":"v=0 answer"}"#;
    ws_send_text(&mut b, answer).await;
    assert_eq!(ws_read_text(&mut a).await, answer);

    let candidate =
        r#"{"type":"candidate","candidate":{"candidate":"candidate:1 1 UDP 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
    ws_send_text(&mut a, candidate).await;
    assert_eq!(ws_read_text(&mut b).await, candidate);
}

#[tokio::test]
async fn third_peer_rejected_with_room_full() {
    let server = TestServer::new().await;
    let (mut a, mut b) = connect_pair(&server, "crowded").await;

    let mut c = ws_connect(&server.ws_url("crowded")).await;
    assert_eq!(ws_read_close_code(&mut c).await, Some(4000));

    // Existing members are undisturbed and still relay
    assert!(ws_try_read_text(&mut a, 100).await.is_none());
    ws_send_text(&mut a, r#"{"type":"offer","sdp":"s"}"#).await;
    assert_eq!(ws_read_text(&mut b).await, r#"{"type":"offer","sdp":"s"}"#);
    assert_eq!(server.peer_count().await, 2);
}

#[tokio::test]
async fn ping_and_invalid_messages_are_not_relayed() {
    let server = TestServer::new().await;
    let (mut a, mut b) = connect_pair(&server, "quiet").await;

    for text in [
        r#"{"type":"ping"}"#,
        "not json",
        r#"{"type":"hello"}"#,
        r#"{"type":"offer"}"#,
        r#"{"type":"candidate","candidate":null}"#,
        r#"{"type":"ready"}"#,
        "[]",
    ] {
        ws_send_text(&mut a, text).await;
    }
    a.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    assert!(ws_try_read_text(&mut b, 300).await.is_none());

    // The channel stayed open
    ws_send_text(&mut a, r#"{"type":"answer","sdp":"ok"}"#).await;
    assert_eq!(ws_read_text(&mut b).await, r#"{"type":"answer","sdp":"ok"}"#);
}

#[tokio::test]
async fn missing_room_rejected_before_upgrade() {
    let server = TestServer::new().await;
    let client = reqwest::Client::new();

    for path in ["/signaling", "/signaling?room=", "/signaling?other=1"] {
        let resp = client
            .get(format!("{}{path}", server.base_url()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "{path}");
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Missing room ID");
    }

    let err = tokio_tungstenite::connect_async(format!("ws://{}/signaling", server.addr)).await;
    assert!(err.is_err());
    assert_eq!(server.peer_count().await, 0);
}

#[tokio::test]
async fn invalid_room_or_plain_http_rejected() {
    let server = TestServer::new().await;
    let client = reqwest::Client::new();

    let long_room = "a".repeat(65);
    let resp = client
        .get(format!("{}/signaling?room={long_room}", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("{}/signaling?room=abcd1234", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Expected a WebSocket upgrade");
}

#[tokio::test]
async fn nested_signaling_path_upgrades() {
    let server = TestServer::new().await;
    let url_a = format!("ws://{}/webrtc/signaling?room=nested", server.addr);
    let mut a = ws_connect(&url_a).await;
    server.wait_for_peers(1).await;
    let mut b = ws_connect(&server.ws_url("nested")).await;
    assert_eq!(ws_read_text(&mut a).await, READY);
    assert_eq!(ws_read_text(&mut b).await, READY);
}

#[tokio::test]
async fn rooms_are_isolated() {
    let server = TestServer::new().await;
    let (mut a1, mut b1) = connect_pair(&server, "room-one").await;
    let (mut a2, mut b2) = connect_pair(&server, "room-two").await;

    ws_send_text(&mut a1, r#"{"type":"offer","sdp":"one"}"#).await;
    assert_eq!(ws_read_text(&mut b1).await, r#"{"type":"offer","sdp":"one"}"#);
    assert!(ws_try_read_text(&mut a2, 200).await.is_none());
    assert!(ws_try_read_text(&mut b2, 100).await.is_none());
}

#[tokio::test]
async fn room_id_with_reserved_characters_round_trips() {
    let server = TestServer::new().await;
    let room = "kitchen table #1 & room=2";
    let (mut a, mut b) = connect_pair(&server, room).await;
    assert_eq!(server.room_member_count(room).await, 2);
    assert_eq!(server.room_member_count("kitchen table ").await, 0);

    ws_send_text(&mut a, r#"{"type":"offer","sdp":"encoded"}"#).await;
    assert_eq!(ws_read_text(&mut b).await, r#"{"type":"offer","sdp":"encoded"}"#);
}

#[tokio::test]
async fn room_deleted_when_last_peer_leaves_and_can_be_reused() {
    let server = TestServer::new().await;
    let (mut a, mut b) = connect_pair(&server, "reuse").await;

    a.close(None).await.unwrap();
    server.wait_for_peers(1).await;
    b.close(None).await.unwrap();
    server.wait_for_peers(0).await;
    assert!(
        server
            .state
            .registry()
            .read()
            .await
            .members_of("reuse")
            .is_none()
    );

    // Two fresh peers get a fresh ready
    let (_c, _d) = connect_pair(&server, "reuse").await;
}

#[tokio::test]
async fn departed_peer_frees_slot() {
    let server = TestServer::new().await;
    let (a, mut b) = connect_pair(&server, "slot").await;
    drop(a);
    server.wait_for_peers(1).await;

    let mut c = ws_connect(&server.ws_url("slot")).await;
    assert_eq!(ws_read_text(&mut b).await, READY);
    assert_eq!(ws_read_text(&mut c).await, READY);
}

#[tokio::test]
async fn silent_peer_closed_as_stale() {
    let mut config = ServerConfig::default();
    config.signaling.idle_timeout_secs = 2;
    config.signaling.sweep_interval_secs = 1;
    let server = TestServer::from_config(config).await;

    let mut a = ws_connect(&server.ws_url("sleepy")).await;
    let started = tokio::time::Instant::now();
    assert_eq!(ws_read_close_code(&mut a).await, Some(4001));
    assert!(started.elapsed() <= Duration::from_secs(4));
    server.wait_for_peers(0).await;
}

#[tokio::test]
async fn pinging_peer_is_not_evicted() {
    let mut config = ServerConfig::default();
    config.signaling.idle_timeout_secs = 2;
    config.signaling.sweep_interval_secs = 1;
    let server = TestServer::from_config(config).await;

    let mut a = ws_connect(&server.ws_url("awake")).await;
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        ws_send_text(&mut a, r#"{"type":"ping"}"#).await;
    }
    assert!(ws_try_read_text(&mut a, 100).await.is_none());
    assert_eq!(server.peer_count().await, 1);
}

#[tokio::test]
async fn connection_cap_returns_503() {
    let mut config = ServerConfig::default();
    config.limits.max_ws_connections = 1;
    let server = TestServer::from_config(config).await;

    let _a = ws_connect(&server.ws_url("capped")).await;
    server.wait_for_peers(1).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/signaling?room=other", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn health_reports_rooms_and_peers() {
    let server = TestServer::new().await;
    let (_a, _b) = connect_pair(&server, "healthy").await;

    let resp = reqwest::get(format!("{}/health", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["connections"], 2);
    assert_eq!(body["rooms"]["active"], 1);
    assert_eq!(body["rooms"]["peers"], 2);
    assert_eq!(
        body["instance"],
        server.state.router.instance_id().to_string()
    );
}

#[tokio::test]
async fn other_paths_fall_through_to_static_files() {
    let server = TestServer::new().await;
    let resp = reqwest::get(format!("{}/definitely-not-here.html", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
