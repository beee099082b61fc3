//! Client behaviour against an in-process WebSocket server.

use futures_util::{SinkExt, StreamExt};
use pulsewire_client::{Client, ClientConfig, ConnectionState, Snapshot};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

fn config(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        reconnect_interval_ms: 20,
        max_reconnect_delay_ms: 100,
        ..ClientConfig::new(format!("ws://{addr}"))
    }
}

async fn wait_until(client: &Client, predicate: impl FnMut(&Snapshot) -> bool) -> Snapshot {
    let mut rx = client.subscribe();
    timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("driver stopped")
        .clone()
}

#[tokio::test]
async fn dispatches_server_frames_into_views() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let frames = [
            "keepalive".to_string(),
            json!({ "type": "workflow_update", "data": { "sessionId": "s1", "stage": "plan", "progress": 10, "status": "running" } }).to_string(),
            json!({ "type": "notification", "data": { "id": "n1", "title": "First" } }).to_string(),
            json!({ "type": "workflow_update", "data": { "sessionId": "s1", "stage": "build", "progress": 60, "status": "running" } }).to_string(),
            json!({ "type": "notification", "data": { "id": "n2", "title": "Second" } }).to_string(),
        ];
        for frame in frames {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }
        while let Some(Ok(_)) = ws.next().await {}
    });

    let client = Client::spawn(config(addr));
    let snapshot = wait_until(&client, |s| {
        s.notifications.len() == 2
            && s.workflow_updates
                .first()
                .is_some_and(|w| w.stage == "build")
    })
    .await;

    assert!(snapshot.connection.is_connected());
    assert_eq!(snapshot.workflow_updates.len(), 1);
    assert_eq!(snapshot.notifications[0].id, "n2");
    assert_eq!(snapshot.notifications[1].id, "n1");

    client.mark_notification_read("n2");
    let snapshot = wait_until(&client, |s| s.notifications[0].is_read).await;
    assert_eq!(snapshot.unread_count(), 1);

    client.dispose().await.unwrap();
}

#[tokio::test]
async fn sends_heartbeat_pings() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let _ = seen_tx.send(text.as_str().to_owned());
            }
        }
    });

    let client = Client::spawn(ClientConfig {
        heartbeat_interval_ms: 30,
        ..config(addr)
    });

    let text = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
    let ping: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(ping["type"], "ping");
    assert!(ping["timestamp"].as_u64().is_some());

    client.dispose().await.unwrap();
}

#[tokio::test]
async fn reconnects_after_abnormal_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        // First connection: handshake, then drop the socket without a close frame.
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        drop(ws);

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let frame = json!({ "type": "notification", "data": { "id": "back", "title": "Reconnected" } });
        ws.send(Message::Text(frame.to_string().into())).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let client = Client::spawn(config(addr));
    let snapshot = wait_until(&client, |s| {
        s.connection.is_connected() && s.notifications.iter().any(|n| n.id == "back")
    })
    .await;

    assert_eq!(snapshot.connection.reconnect_attempt, 0);
    assert_eq!(snapshot.connection.last_error, None);

    client.dispose().await.unwrap();
}

#[tokio::test]
async fn manual_disconnect_sends_normal_closure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (close_tx, mut close_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(frame) = msg {
                let _ = close_tx.send(frame.map(|f| u16::from(f.code)));
            }
        }
    });

    let client = Client::spawn(ClientConfig {
        auto_connect: false,
        ..config(addr)
    });

    // Not connected yet: dropped, not queued.
    client.send(json!({ "type": "chat", "text": "too early" }));
    assert_eq!(client.status().state, ConnectionState::Disconnected);

    client.connect();
    wait_until(&client, |s| s.connection.is_connected()).await;

    client.disconnect();
    let code = timeout(WAIT, close_rx.recv()).await.unwrap().unwrap();
    assert_eq!(code, Some(1000));

    let snapshot = wait_until(&client, |s| {
        s.connection.state == ConnectionState::Disconnected
    })
    .await;
    assert_eq!(snapshot.connection.reconnect_attempt, 0);

    client.dispose().await.unwrap();
}

#[tokio::test]
async fn gives_up_when_nothing_listens() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::spawn(ClientConfig {
        max_reconnect_attempts: 3,
        ..config(addr)
    });

    let snapshot = wait_until(&client, |s| {
        s.connection.state == ConnectionState::FailedPermanently
    })
    .await;
    assert_eq!(snapshot.connection.reconnect_attempt, 3);
    assert!(snapshot.connection.last_error.is_some());

    client.dispose().await.unwrap();
}

#[tokio::test]
async fn malformed_url_is_reported_not_raised() {
    let client = Client::spawn(ClientConfig {
        max_reconnect_attempts: 1,
        ..ClientConfig::new("not a url")
    });

    let snapshot = wait_until(&client, |s| {
        s.connection.state == ConnectionState::FailedPermanently
    })
    .await;
    assert!(snapshot.connection.last_error.is_some());

    client.dispose().await.unwrap();
}

/// Accept TCP connections and drop them at once, counting each one.
async fn refusing_server() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });
    (addr, accepted)
}

fn slow_retry(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        reconnect_interval_ms: 200,
        max_reconnect_delay_ms: 1000,
        max_reconnect_attempts: 10,
        ..ClientConfig::new(format!("ws://{addr}"))
    }
}

#[tokio::test]
async fn dispose_cancels_pending_reconnect() {
    let (addr, accepted) = refusing_server().await;
    let client = Client::spawn(slow_retry(addr));
    wait_until(&client, |s| s.connection.state == ConnectionState::Reconnecting).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    client.dispose().await.unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dropping_last_handle_cancels_pending_reconnect() {
    let (addr, accepted) = refusing_server().await;
    let client = Client::spawn(slow_retry(addr));
    let observer = client.clone();
    wait_until(&observer, |s| s.connection.state == ConnectionState::Reconnecting).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    drop(observer);
    drop(client);
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn wss_endpoints_attempt_a_tls_handshake() {
    let (addr, accepted) = refusing_server().await;
    let client = Client::spawn(ClientConfig {
        url: format!("wss://{addr}/ws"),
        ..slow_retry(addr)
    });

    let snapshot = wait_until(&client, |s| {
        s.connection.state == ConnectionState::Reconnecting && s.connection.last_error.is_some()
    })
    .await;
    let error = snapshot.connection.last_error.unwrap();
    assert!(!error.contains("TLS support not compiled in"), "{error}");
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    client.dispose().await.unwrap();
}
