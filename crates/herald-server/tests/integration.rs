//! End-to-end tests against a real server on an ephemeral port, using the
//! in-memory bus and a real `WebSocket` client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use herald_bus::{MemoryBus, PubSubBus};
use herald_server::shutdown::DrainOutcome;
use herald_server::{HeraldServer, ServerConfig, Worker};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    base: String,
    ws_url: String,
    bus: Arc<MemoryBus>,
    worker: Arc<Worker>,
    server: HeraldServer,
}

fn test_config(shutdown_timeout: Duration) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        read_timeout: Duration::from_millis(50),
        shutdown_notice_grace: Duration::from_millis(50),
        shutdown_timeout,
        check_interval: Duration::from_millis(100),
        notifier_enabled: false,
        ..ServerConfig::default()
    }
}

/// Boot a worker and server; return handles for driving them.
async fn boot(shutdown_timeout: Duration) -> TestServer {
    let bus = Arc::new(MemoryBus::new());
    let config = test_config(shutdown_timeout);
    let worker = Arc::new(Worker::new(bus.clone(), config.clone()));
    worker.start().await;

    let server = HeraldServer::new(config, worker.registry(), None);
    let (addr, _handle) = server.listen().await.unwrap();
    TestServer {
        base: format!("http://{addr}"),
        ws_url: format!("ws://{addr}/ws"),
        bus,
        worker,
        server,
    }
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url)).await.unwrap().unwrap();
    ws
}

/// Next text frame as JSON, skipping control frames.
async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(_) = msg {
            return serde_json::from_str(msg.to_text().unwrap()).unwrap();
        }
        assert!(!msg.is_close(), "unexpected close: {msg:?}");
    }
}

/// Read until a close frame arrives; return its code and any JSON frames seen.
async fn read_until_close(ws: &mut WsStream) -> (Option<u16>, Vec<Value>) {
    let mut seen = Vec::new();
    loop {
        match timeout(TIMEOUT, ws.next()).await.unwrap() {
            Some(Ok(Message::Close(frame))) => return (frame.map(|f| u16::from(f.code)), seen),
            Some(Ok(msg @ Message::Text(_))) => {
                seen.push(serde_json::from_str(msg.to_text().unwrap()).unwrap());
            }
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return (None, seen),
        }
    }
}

async fn wait_for_connections(ts: &TestServer, expected: usize) {
    timeout(TIMEOUT, async {
        while ts.worker.registry().connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn wait_for_subscribers(ts: &TestServer, expected: usize) {
    timeout(TIMEOUT, async {
        while ts.bus.subscriber_count("notifications") != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn post_notify(base: &str, query: &str) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{base}/notify{query}"))
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn welcome_then_disconnect_returns_count_to_zero() {
    let ts = boot(Duration::from_secs(5)).await;
    let mut ws = connect(&ts.ws_url).await;

    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["message"], "Connected to WebSocket server");
    assert!(welcome["timestamp"].is_string());
    wait_for_connections(&ts, 1).await;

    ws.close(None).await.unwrap();
    wait_for_connections(&ts, 0).await;
    wait_for_subscribers(&ts, 0).await;
}

#[tokio::test]
async fn notify_with_zero_clients() {
    let ts = boot(Duration::from_secs(5)).await;
    let (status, body) = post_notify(&ts.base, "?message=Test%20message").await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({"status": "success", "message": "Notification sent to 0 clients"})
    );
}

#[tokio::test]
async fn notify_during_shutdown_is_refused() {
    let ts = boot(Duration::from_secs(5)).await;
    let mut sub = ts.bus.subscribe("notifications").await.unwrap();
    let _ = ts.worker.registry().initiate_shutdown();

    let (status, body) = post_notify(&ts.base, "").await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({"status": "error", "message": "Server is shutting down"})
    );
    assert!(
        timeout(Duration::from_millis(100), sub.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn bus_publish_reaches_client_as_echo() {
    let ts = boot(Duration::from_secs(5)).await;
    let mut ws = connect(&ts.ws_url).await;
    let _ = next_json(&mut ws).await;
    wait_for_subscribers(&ts, 1).await;

    let _ = ts
        .bus
        .publish("notifications", r#"{"type":"notification","message":"from elsewhere"}"#)
        .await
        .unwrap();
    let echo = next_json(&mut ws).await;
    assert_eq!(echo["type"], "echo");
    assert_eq!(echo["message"]["message"], "from elsewhere");

    let _ = ts.bus.publish("notifications", "not json").await.unwrap();
    let echo = next_json(&mut ws).await;
    assert_eq!(echo["message"], json!({"text": "not json"}));
}

#[tokio::test]
async fn notify_reaches_connected_client() {
    let ts = boot(Duration::from_secs(5)).await;
    let mut ws = connect(&ts.ws_url).await;
    let _ = next_json(&mut ws).await;
    wait_for_subscribers(&ts, 1).await;

    let (status, body) = post_notify(&ts.base, "?message=hello").await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Notification sent to 1 clients");

    let echo = next_json(&mut ws).await;
    assert_eq!(echo["type"], "echo");
    assert_eq!(echo["message"]["type"], "notification");
    assert_eq!(echo["message"]["message"], "hello");
    assert_eq!(echo["message"]["source"], "api");
}

#[tokio::test]
async fn client_message_fans_out_to_every_client() {
    let ts = boot(Duration::from_secs(5)).await;
    let mut alice = connect(&ts.ws_url).await;
    let mut bob = connect(&ts.ws_url).await;
    let _ = next_json(&mut alice).await;
    let _ = next_json(&mut bob).await;
    wait_for_subscribers(&ts, 2).await;

    alice
        .send(Message::text(r#"{"message": {"text": "hi all"}}"#.to_owned()))
        .await
        .unwrap();

    for ws in [&mut alice, &mut bob] {
        let echo = next_json(ws).await;
        assert_eq!(echo["type"], "echo");
        assert_eq!(echo["message"]["message"], "hi all");
        assert_eq!(echo["message"]["source"], "user");
    }
}

#[tokio::test]
async fn graceful_stop_notifies_then_closes() {
    let ts = boot(Duration::from_secs(5)).await;
    let mut ws = connect(&ts.ws_url).await;
    let _ = next_json(&mut ws).await;
    wait_for_connections(&ts, 1).await;

    let worker = Arc::clone(&ts.worker);
    let stop = tokio::spawn(async move { worker.stop().await });

    let (code, frames) = read_until_close(&mut ws).await;
    assert_eq!(code, Some(1001));
    let notices = frames
        .iter()
        .filter(|f| f["type"] == "shutdown_notice")
        .count();
    assert_eq!(notices, 1);
    assert_eq!(
        frames.last().unwrap()["message"],
        "Server is shutting down. Please disconnect."
    );

    let outcome = timeout(TIMEOUT, stop).await.unwrap().unwrap();
    assert_eq!(outcome, Some(DrainOutcome::Drained));
    assert!(!ts.bus.is_connected());
    ts.server.stop();
}

#[tokio::test]
async fn zero_timeout_force_closes_lingering_client() {
    let ts = boot(Duration::ZERO).await;
    let mut ws = connect(&ts.ws_url).await;
    let _ = next_json(&mut ws).await;
    wait_for_connections(&ts, 1).await;

    let outcome = timeout(TIMEOUT, ts.worker.stop()).await.unwrap();
    assert_eq!(outcome, Some(DrainOutcome::ForceClosed { closed: 1 }));
    assert_eq!(ts.worker.registry().connection_count(), 0);

    let (code, _) = read_until_close(&mut ws).await;
    assert_eq!(code, Some(1001));
}

#[tokio::test]
async fn new_connections_rejected_during_shutdown() {
    let ts = boot(Duration::from_secs(5)).await;
    let _ = ts.worker.registry().initiate_shutdown();

    let mut ws = connect(&ts.ws_url).await;
    let (code, frames) = read_until_close(&mut ws).await;
    assert_eq!(code, Some(1001));
    assert!(frames.is_empty());
    assert_eq!(ts.worker.registry().connection_count(), 0);
}

#[tokio::test]
async fn health_tracks_connections() {
    let ts = boot(Duration::from_secs(5)).await;
    let mut ws = connect(&ts.ws_url).await;
    let _ = next_json(&mut ws).await;
    wait_for_connections(&ts, 1).await;

    let body: Value = reqwest::get(format!("{}/health", ts.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
    assert_eq!(body["shutting_down"], false);
}
