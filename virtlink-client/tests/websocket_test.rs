//! WebSocket transport and server-initiated notifications.

mod common;

use common::{rpc_client, MockBinaryServer, MockWsServer};
use std::time::Duration;
use tokio::sync::mpsc;
use virtlink_client::{ClientPolicy, Reactor, ResponseTracker, TransportKind};

fn policy() -> ClientPolicy {
    ClientPolicy::new(0, Duration::from_secs(5))
}

#[tokio::test]
async fn echo_round_trip_over_websocket() {
    let server = MockWsServer::echo().await;
    let reactor = Reactor::new("ws").unwrap();
    let tracker = ResponseTracker::new();
    let rpc = rpc_client(
        &reactor,
        &tracker,
        TransportKind::WebSocket,
        server.port(),
        policy(),
    );

    let params = serde_json::json!(["one", "two"]);
    let response = rpc
        .request("Host.ping", Some(params.clone()))
        .await
        .unwrap()
        .await
        .unwrap();
    assert_eq!(response.into_result().unwrap(), params);
    assert!(tracker.is_idle());

    rpc.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn connect_is_idempotent_and_concurrent_callers_share_one_handshake() {
    let server = MockWsServer::echo().await;
    let reactor = Reactor::new("ws-connect").unwrap();
    let tracker = ResponseTracker::new();
    let rpc = rpc_client(
        &reactor,
        &tracker,
        TransportKind::WebSocket,
        server.port(),
        policy(),
    );

    let client = rpc.client().clone();
    let (a, b, c) = tokio::join!(client.connect(), client.connect(), client.connect());
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert!(client.is_open());
    assert!(!client.is_closed());

    // Already open: returns immediately.
    client.connect().await.unwrap();

    rpc.close().await;
    assert!(client.is_closed());
    server.shutdown().await;
}

#[tokio::test]
async fn server_notifications_reach_registered_handlers() {
    // The peer answers a request and pushes an event notification for it.
    let server = MockBinaryServer::with_handler(|text| async move {
        let value: serde_json::Value = serde_json::from_str(&text).ok()?;
        if value.get("id").is_some() {
            common::echo_reply(&text)
        } else {
            // A notification from the client; push an event back.
            Some(
                serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "VM.statusChanged",
                    "params": {"vmId": "f2d8", "status": "Up"},
                })
                .to_string(),
            )
        }
    })
    .await;
    let reactor = Reactor::new("events").unwrap();
    let tracker = ResponseTracker::new();
    let rpc = rpc_client(&reactor, &tracker, TransportKind::Plain, server.port(), policy());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    rpc.on_notification("VM.statusChanged", move |notification| {
        let _ = event_tx.send(notification.params);
    });

    rpc.notify("Host.eventsInterest", None).await.unwrap();

    let params = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(params["vmId"], "f2d8");
    assert_eq!(params["status"], "Up");

    rpc.close().await;
    server.shutdown().await;
}
