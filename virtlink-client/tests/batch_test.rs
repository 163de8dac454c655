//! Batch submission and response ordering.

mod common;

use common::{rpc_client, MockBinaryServer, MockWsServer};
use std::time::Duration;
use virtlink_client::{ClientPolicy, Reactor, ResponseTracker, TransportKind};
use virtlink_core::{Error, Id, JsonRpcRequest};

fn policy() -> ClientPolicy {
    ClientPolicy::new(0, Duration::from_secs(5))
}

fn member(id: &str, value: i64) -> JsonRpcRequest {
    JsonRpcRequest::new("VM.getStats", Some(serde_json::json!(value)), Id::from(id))
}

#[tokio::test]
async fn reversed_replies_come_back_in_submission_order() {
    // The echo server answers batches in reverse order on purpose.
    let server = MockBinaryServer::echo().await;
    let reactor = Reactor::new("batch").unwrap();
    let tracker = ResponseTracker::new();
    let rpc = rpc_client(&reactor, &tracker, TransportKind::Plain, server.port(), policy());

    let pending = rpc
        .batch_call(vec![member("a", 1), member("b", 2), member("c", 3)])
        .await
        .unwrap();
    let responses = pending.await.unwrap();

    let ids: Vec<_> = responses.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![Id::from("a"), Id::from("b"), Id::from("c")]);
    let results: Vec<_> = responses
        .into_iter()
        .map(|r| r.into_result().unwrap())
        .collect();
    assert_eq!(
        results,
        vec![serde_json::json!(1), serde_json::json!(2), serde_json::json!(3)]
    );
    assert!(tracker.is_idle());

    rpc.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn batch_over_websocket() {
    let server = MockWsServer::echo().await;
    let reactor = Reactor::new("ws-batch").unwrap();
    let tracker = ResponseTracker::new();
    let rpc = rpc_client(
        &reactor,
        &tracker,
        TransportKind::WebSocket,
        server.port(),
        policy(),
    );

    let pending = rpc
        .batch_call(vec![member("x", 10), member("y", 20)])
        .await
        .unwrap();
    let responses = pending.await.unwrap();
    assert_eq!(responses[0].id, Id::from("x"));
    assert_eq!(responses[1].id, Id::from("y"));

    rpc.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn empty_batch_is_rejected() {
    let server = MockBinaryServer::echo().await;
    let reactor = Reactor::new("empty").unwrap();
    let tracker = ResponseTracker::new();
    let rpc = rpc_client(&reactor, &tracker, TransportKind::Plain, server.port(), policy());

    assert!(matches!(
        rpc.batch_call(Vec::new()).await,
        Err(Error::EncodingFault(_))
    ));

    rpc.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn duplicate_id_inside_a_batch_registers_nothing() {
    let server = MockBinaryServer::with_handler(|_| async move { None }).await;
    let reactor = Reactor::new("batch-dup").unwrap();
    let tracker = ResponseTracker::new();
    let rpc = rpc_client(&reactor, &tracker, TransportKind::Plain, server.port(), policy());

    let outcome = rpc
        .batch_call(vec![member("same", 1), member("same", 2)])
        .await;
    assert!(matches!(outcome, Err(Error::RequestAlreadyInFlight(_))));
    assert_eq!(tracker.pending_calls(), 0);

    rpc.close().await;
    server.shutdown().await;
}
