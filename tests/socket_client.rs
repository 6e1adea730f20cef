//! End-to-end tests of the async client against an in-process WebSocket
//! server

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use common::{closed_port_url, eventually, wait_for_state, MockServer, REJECTED_TOKEN};
use realtime_link::client::{ClientConfig, ClientEvent, ConnectionState, RealtimeClient};

const LIMIT: Duration = Duration::from_secs(5);

fn config_for(server: &MockServer) -> ClientConfig {
    ClientConfig {
        reconnect_interval: Duration::from_millis(50),
        max_reconnect_interval: Duration::from_millis(200),
        auto_connect: false,
        ..ClientConfig::new(server.url())
    }
}

fn recorder() -> (Arc<Mutex<Vec<Value>>>, impl Fn(&Value) -> anyhow::Result<()> + Send + Sync) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener = move |data: &Value| {
        sink.lock().push(data.clone());
        Ok(())
    };
    (seen, listener)
}

// ─────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connects_and_records_confirmation() {
    let server = MockServer::start().await;
    let client = RealtimeClient::new(ClientConfig {
        auto_connect: true,
        ..config_for(&server)
    })
    .unwrap();

    let mut state = client.watch_state();
    let snapshot = wait_for_state(&mut state, LIMIT, |s| s.connection_id.is_some()).await;
    assert_eq!(snapshot.connection_id.as_deref(), Some("conn-1"));
    assert!(snapshot.is_connected);
    assert_eq!(snapshot.retry_count, 0);
    assert_eq!(snapshot.error, None);
}

#[tokio::test]
async fn test_delivers_channel_frames_to_every_listener() {
    let server = MockServer::start().await;
    let client = RealtimeClient::new(config_for(&server)).unwrap();

    client.subscribe("alerts", |_| anyhow::bail!("listener failed"));
    let (seen, listener) = recorder();
    client.subscribe("alerts", listener);
    client.connect();

    eventually(LIMIT, "subscribe frame", || {
        server.received_kind("subscribe").len() == 1
    })
    .await;
    assert_eq!(server.received_kind("subscribe")[0]["data"]["channel"], "alerts");

    server.push(json!({ "kind": "alerts", "data": { "level": "high" } }));
    server.push(json!({ "kind": "other", "data": { "ignored": true } }));
    server.push(json!({ "kind": "alerts", "data": { "level": "low" } }));

    eventually(LIMIT, "two alerts", || seen.lock().len() == 2).await;
    assert_eq!(
        seen.lock().as_slice(),
        &[json!({ "level": "high" }), json!({ "level": "low" })]
    );
    assert_eq!(client.ref_count("alerts"), 2);
}

#[tokio::test]
async fn test_offline_messages_flush_in_order() {
    let server = MockServer::start().await;
    let client = RealtimeClient::new(config_for(&server)).unwrap();

    for n in 1..=3 {
        assert!(client.send_message("orders", json!({ "n": n })));
    }
    assert_eq!(client.queued(), 3);
    client.connect();

    eventually(LIMIT, "queued orders", || {
        server.received_kind("orders").len() == 3
    })
    .await;
    let order: Vec<Value> = server
        .received_kind("orders")
        .into_iter()
        .map(|f| f["data"]["n"].clone())
        .collect();
    assert_eq!(order, vec![json!(1), json!(2), json!(3)]);
    assert_eq!(client.queued(), 0);
}

#[tokio::test]
async fn test_full_queue_rejects_sends() {
    let server = MockServer::start().await;
    let client = RealtimeClient::new(ClientConfig {
        message_queue_size: 2,
        ..config_for(&server)
    })
    .unwrap();

    assert!(client.send_message("orders", json!(1)));
    assert!(client.send_message("orders", json!(2)));
    assert!(!client.send_message("orders", json!(3)));
    assert!(client.snapshot().error.unwrap().contains("queue full"));
}

// ─────────────────────────────────────────────────────────────────
// Recovery
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reconnect_replays_subscriptions() {
    let server = MockServer::start().await;
    let client = RealtimeClient::new(config_for(&server)).unwrap();
    let (seen, listener) = recorder();
    client.subscribe("workflow:7", listener);
    client.subscribe("alerts", |_| Ok(()));
    client.connect();

    let mut state = client.watch_state();
    wait_for_state(&mut state, LIMIT, |s| s.connection_id.as_deref() == Some("conn-1")).await;
    eventually(LIMIT, "initial subscriptions", || {
        server.received_kind("subscribe").len() == 2
    })
    .await;

    server.drop_connections();
    wait_for_state(&mut state, LIMIT, |s| s.connection_id.as_deref() == Some("conn-2")).await;
    eventually(LIMIT, "replayed subscriptions", || {
        server.received_kind("subscribe").len() == 4
    })
    .await;

    let replayed: Vec<Value> = server.received_kind("subscribe")[2..]
        .iter()
        .map(|f| f["data"]["channel"].clone())
        .collect();
    assert_eq!(replayed, vec![json!("alerts"), json!("workflow:7")]);

    server.push(json!({ "kind": "workflow:7", "data": { "step": 3 } }));
    eventually(LIMIT, "delivery after reconnect", || seen.lock().len() == 1).await;
    assert_eq!(client.snapshot().retry_count, 0);
}

#[tokio::test]
async fn test_heartbeat_measures_latency() {
    let server = MockServer::start().await;
    let client = RealtimeClient::new(ClientConfig {
        heartbeat_interval: Duration::from_millis(100),
        ..config_for(&server)
    })
    .unwrap();
    client.connect();

    let mut state = client.watch_state();
    let snapshot = wait_for_state(&mut state, LIMIT, |s| s.latency.is_some()).await;
    assert!(snapshot.latency.unwrap() < LIMIT.as_millis() as u64);
    assert!(!server.received_kind("ping").is_empty());
}

#[tokio::test]
async fn test_rejected_token_fails_without_retry() {
    let server = MockServer::start().await;
    let client = RealtimeClient::new(config_for(&server)).unwrap();
    client.set_token(Some(REJECTED_TOKEN.to_string()));
    client.connect();

    let mut state = client.watch_state();
    let snapshot = wait_for_state(&mut state, LIMIT, |s| s.state == ConnectionState::Failed).await;
    assert!(snapshot.error.unwrap().contains("invalid token"));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connections(), 1);
    assert_eq!(client.snapshot().state, ConnectionState::Failed);
}

#[tokio::test]
async fn test_disconnect_stays_idle() {
    let server = MockServer::start().await;
    let client = RealtimeClient::new(config_for(&server)).unwrap();
    client.connect();

    let mut state = client.watch_state();
    wait_for_state(&mut state, LIMIT, |s| s.is_connected).await;
    client.disconnect();

    let snapshot = client.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Idle);
    assert_eq!(snapshot.connection_id, None);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connections(), 1);
    assert_eq!(client.snapshot().state, ConnectionState::Idle);
}

#[tokio::test]
async fn test_unsubscribe_reaches_server() {
    let server = MockServer::start().await;
    let client = RealtimeClient::new(config_for(&server)).unwrap();
    client.connect();

    let mut state = client.watch_state();
    wait_for_state(&mut state, LIMIT, |s| s.is_connected).await;

    let first = client.subscribe("alerts", |_| Ok(()));
    let second = client.subscribe("alerts", |_| Ok(()));
    assert!(first.unsubscribe());
    assert!(second.unsubscribe());

    eventually(LIMIT, "unsubscribe frame", || {
        server.received_kind("unsubscribe").len() == 1
    })
    .await;
    assert_eq!(server.received_kind("subscribe").len(), 1);
}

// ─────────────────────────────────────────────────────────────────
// Backoff (virtual time)
// ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_unreachable_endpoint_exhausts_attempts() {
    let client = RealtimeClient::new(ClientConfig {
        reconnect_attempts: 3,
        auto_connect: false,
        ..ClientConfig::new(closed_port_url().await)
    })
    .unwrap();

    let mut events = client.events();
    client.connect();

    let delays = tokio::time::timeout(Duration::from_secs(600), async {
        let mut delays = Vec::new();
        loop {
            match events.recv().await.unwrap() {
                ClientEvent::Reconnecting { delay_ms, .. } => delays.push(delay_ms),
                ClientEvent::StateChanged(ConnectionState::Failed) => return delays,
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(delays, vec![3000, 6000, 12000]);
    let snapshot = client.snapshot();
    assert_eq!(snapshot.error.as_deref(), Some("Reconnection failed after 3 attempts"));
    assert_eq!(snapshot.retry_count, 3);
}
