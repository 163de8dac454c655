//! Shared mock peers for the integration tests.
//!
//! Two in-process servers, one per framing: [`MockBinaryServer`] speaks the
//! length-prefixed binary framing, [`MockWsServer`] speaks WebSocket. Both
//! feed every received payload into a channel for assertions and answer
//! through a caller-supplied handler, so tests can echo, drop, delay or
//! corrupt traffic as needed.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::codec::Framed;
use virtlink_client::{ClientPolicy, FrameCodec, JsonRpcClient, Reactor, ResponseTracker, TransportKind};

/// Mock peer speaking the length-prefixed binary framing.
pub struct MockBinaryServer {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    message_rx: mpsc::Receiver<String>,
}

impl MockBinaryServer {
    /// Server echoing every request as `{id, result: params}`; batches come
    /// back in reverse order to exercise response reordering.
    pub async fn echo() -> Self {
        Self::with_handler(|text| async move { echo_reply(&text) }).await
    }

    /// Server answering through `handler`; `None` means stay silent.
    pub async fn with_handler<F, Fut>(handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<String>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (msg_tx, message_rx) = mpsc::channel(256);
        let handler = Arc::new(handler);

        let mut accept_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.changed() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        tokio::spawn(serve_binary(
                            stream,
                            handler.clone(),
                            msg_tx.clone(),
                            shutdown_rx.clone(),
                        ));
                    }
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        Self {
            addr,
            shutdown_tx,
            message_rx,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Next payload the server received, within a 5 second budget.
    pub async fn wait_for_message(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Stop accepting and drop every live connection.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn serve_binary<F, Fut>(
    stream: TcpStream,
    handler: Arc<F>,
    msg_tx: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
) where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<String>> + Send + 'static,
{
    let mut framed = Framed::new(stream, FrameCodec::default());
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = framed.next() => {
                let Some(Ok(payload)) = frame else { break };
                let text = String::from_utf8_lossy(&payload).to_string();
                let _ = msg_tx.send(text.clone()).await;
                if let Some(reply) = handler(text).await {
                    if framed.send(reply.into_bytes()).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Mock peer speaking WebSocket.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    message_rx: mpsc::Receiver<String>,
}

impl MockWsServer {
    pub async fn echo() -> Self {
        Self::with_handler(|text| async move { echo_reply(&text) }).await
    }

    pub async fn with_handler<F, Fut>(handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<String>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (msg_tx, message_rx) = mpsc::channel(256);
        let handler = Arc::new(handler);

        let mut accept_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.changed() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        tokio::spawn(serve_ws(
                            stream,
                            handler.clone(),
                            msg_tx.clone(),
                            shutdown_rx.clone(),
                        ));
                    }
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        Self {
            addr,
            shutdown_tx,
            message_rx,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn wait_for_message(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn serve_ws<F, Fut>(
    stream: TcpStream,
    handler: Arc<F>,
    msg_tx: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
) where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<String>> + Send + 'static,
{
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            message = ws.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let _ = msg_tx.send(text.clone()).await;
                        if let Some(reply) = handler(text).await {
                            if ws.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Echo a request as `{id, result: params}`; batches are answered in
/// reverse order. Notifications (no id) get no reply.
pub fn echo_reply(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if let Some(array) = value.as_array() {
        let responses: Vec<_> = array.iter().rev().filter_map(echo_one).collect();
        if responses.is_empty() {
            return None;
        }
        return Some(serde_json::Value::Array(responses).to_string());
    }
    echo_one(&value).map(|v| v.to_string())
}

fn echo_one(value: &serde_json::Value) -> Option<serde_json::Value> {
    let id = value.get("id")?;
    if id.is_null() {
        return None;
    }
    Some(serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": value.get("params").cloned().unwrap_or(serde_json::Value::Null),
    }))
}

/// Extract the `id` field of a received request payload.
pub fn request_id(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("id")?.as_str().map(str::to_string)
}

/// Wire a fresh client for `127.0.0.1:port` to the given tracker.
pub fn rpc_client(
    reactor: &Reactor,
    tracker: &ResponseTracker,
    kind: TransportKind,
    port: u16,
    policy: ClientPolicy,
) -> JsonRpcClient {
    let client = reactor.create_client(kind, "127.0.0.1", port).unwrap();
    JsonRpcClient::new(client, tracker.clone(), policy).unwrap()
}
