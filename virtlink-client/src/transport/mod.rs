//! Transport variants and connection establishment.
//!
//! The four wire flavours differ only in framing and handshake, so they are
//! a tagged enum rather than a type hierarchy: length-prefixed binary over
//! TCP, the same over TLS, and WebSocket over plain or TLS TCP. The reactor
//! drives every variant through the same capability set: read a whole
//! message, write a whole message, emit a heartbeat, shut down.
//!
//! Establishing a connection covers the whole initialization phase: TCP
//! connect plus, depending on the variant, the TLS and/or WebSocket
//! handshake. Callers see the client as `Initializing` until this completes.

mod framing;
mod tls;

pub use framing::{FrameCodec, DEFAULT_MAX_FRAME};
pub use tls::TlsConfig;

use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use std::io;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{client_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tokio_util::codec::Framed;
use virtlink_core::{codec, Error, JsonRpcNotification, Result};

/// Wire flavour of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Length-prefixed binary frames over TCP.
    Plain,
    /// Length-prefixed binary frames over TLS.
    Tls,
    /// RFC 6455 WebSocket over TCP.
    WebSocket,
    /// RFC 6455 WebSocket over TLS.
    WebSocketTls,
}

impl TransportKind {
    /// True for the TLS-wrapped variants, which require a [`TlsConfig`].
    pub fn uses_tls(&self) -> bool {
        matches!(self, TransportKind::Tls | TransportKind::WebSocketTls)
    }
}

/// Where and how a client connects.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionConfig {
    pub(crate) kind: TransportKind,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) tls: Option<TlsConfig>,
    pub(crate) max_frame: usize,
}

/// One inbound event from a connection.
pub(crate) enum Inbound {
    /// A whole JSON payload.
    Message(Vec<u8>),
    /// Traffic that carries no payload but proves the peer is alive
    /// (WebSocket ping/pong).
    Keepalive,
}

/// An established connection, uniform across transport variants.
pub(crate) enum Connection {
    Binary(Framed<TcpStream, FrameCodec>),
    BinaryTls(Framed<tokio_rustls::client::TlsStream<TcpStream>, FrameCodec>),
    WebSocket(Box<WebSocketStream<MaybeTlsStream<TcpStream>>>),
}

impl Connection {
    /// Connect and run the transport handshake.
    pub(crate) async fn establish(config: &ConnectionConfig) -> Result<Self> {
        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(|e| {
                tracing::debug!(host = %config.host, port = config.port, error = %e, "tcp connect failed");
                Error::ConnectionFailed
            })?;
        let _ = stream.set_nodelay(true);

        match config.kind {
            TransportKind::Plain => Ok(Connection::Binary(Framed::new(
                stream,
                FrameCodec::new(config.max_frame),
            ))),
            TransportKind::Tls => {
                let tls = required_tls(config)?;
                let name = server_name(&config.host)?;
                let connector = TlsConnector::from(tls.client_config());
                let stream = connector.connect(name, stream).await.map_err(|e| {
                    tracing::debug!(host = %config.host, error = %e, "tls handshake failed");
                    Error::ConnectionFailed
                })?;
                Ok(Connection::BinaryTls(Framed::new(
                    stream,
                    FrameCodec::new(config.max_frame),
                )))
            }
            TransportKind::WebSocket | TransportKind::WebSocketTls => {
                let scheme = if config.kind.uses_tls() { "wss" } else { "ws" };
                let url = format!("{}://{}:{}/", scheme, config.host, config.port);
                let connector = if config.kind.uses_tls() {
                    Some(Connector::Rustls(required_tls(config)?.client_config()))
                } else {
                    None
                };
                let mut ws_config = WebSocketConfig::default();
                ws_config.max_message_size = Some(config.max_frame);
                ws_config.max_frame_size = Some(config.max_frame);
                let (stream, _) =
                    client_async_tls_with_config(url.as_str(), stream, Some(ws_config), connector)
                        .await
                        .map_err(|e| {
                            tracing::debug!(url = %url, error = %e, "websocket handshake failed");
                            Error::ConnectionFailed
                        })?;
                Ok(Connection::WebSocket(Box::new(stream)))
            }
        }
    }

    /// Read the next inbound event; `None` means the peer closed cleanly.
    pub(crate) async fn next_event(&mut self) -> Option<Result<Inbound>> {
        match self {
            Connection::Binary(framed) => framed
                .next()
                .await
                .map(|res| res.map(Inbound::Message).map_err(map_io_error)),
            Connection::BinaryTls(framed) => framed
                .next()
                .await
                .map(|res| res.map(Inbound::Message).map_err(map_io_error)),
            Connection::WebSocket(stream) => match stream.next().await? {
                Ok(Message::Text(text)) => Some(Ok(Inbound::Message(text.into_bytes()))),
                Ok(Message::Binary(payload)) => Some(Ok(Inbound::Message(payload))),
                Ok(Message::Ping(payload)) => {
                    if let Err(e) = stream.send(Message::Pong(payload)).await {
                        return Some(Err(Error::ConnectionLost(e.to_string())));
                    }
                    Some(Ok(Inbound::Keepalive))
                }
                Ok(Message::Pong(_)) => Some(Ok(Inbound::Keepalive)),
                Ok(Message::Close(_)) => None,
                Ok(Message::Frame(_)) => Some(Ok(Inbound::Keepalive)),
                Err(e) => Some(Err(Error::ConnectionLost(e.to_string()))),
            },
        }
    }

    /// Write one whole JSON payload.
    pub(crate) async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        match self {
            Connection::Binary(framed) => framed.send(payload).await.map_err(map_io_error),
            Connection::BinaryTls(framed) => framed.send(payload).await.map_err(map_io_error),
            Connection::WebSocket(stream) => {
                let text = String::from_utf8(payload)
                    .map_err(|e| Error::EncodingFault(e.to_string()))?;
                stream
                    .send(Message::Text(text))
                    .await
                    .map_err(|e| Error::ConnectionLost(e.to_string()))
            }
        }
    }

    /// Emit the protocol-specific liveness signal.
    pub(crate) async fn send_heartbeat(&mut self) -> Result<()> {
        match self {
            Connection::Binary(_) | Connection::BinaryTls(_) => {
                let payload = codec::encode(&JsonRpcNotification::heartbeat())?;
                self.send(payload).await
            }
            Connection::WebSocket(stream) => stream
                .send(Message::Ping(Vec::new()))
                .await
                .map_err(|e| Error::ConnectionLost(e.to_string())),
        }
    }

    /// Best-effort orderly shutdown; errors are ignored, the socket is gone
    /// either way.
    pub(crate) async fn shutdown(&mut self) {
        match self {
            Connection::Binary(framed) => {
                let _ = framed.get_mut().shutdown().await;
            }
            Connection::BinaryTls(framed) => {
                let _ = framed.get_mut().shutdown().await;
            }
            Connection::WebSocket(stream) => {
                let _ = stream.close().await;
            }
        }
    }
}

fn required_tls(config: &ConnectionConfig) -> Result<&TlsConfig> {
    config
        .tls
        .as_ref()
        .ok_or_else(|| Error::Internal("tls transport requires a TlsConfig".to_string()))
}

fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|_| Error::Internal(format!("invalid tls server name: {host}")))
}

/// Framing-level I/O errors: corrupt frames are a decoder fault, anything
/// else means the connection is gone.
fn map_io_error(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::InvalidData {
        Error::DecodingFault(e.to_string())
    } else {
        Error::ConnectionLost(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_variants_are_flagged() {
        assert!(!TransportKind::Plain.uses_tls());
        assert!(TransportKind::Tls.uses_tls());
        assert!(!TransportKind::WebSocket.uses_tls());
        assert!(TransportKind::WebSocketTls.uses_tls());
    }

    #[test]
    fn decode_faults_are_distinguished_from_io_faults() {
        let decode = io::Error::new(io::ErrorKind::InvalidData, "oversize frame");
        assert!(matches!(map_io_error(decode), Error::DecodingFault(_)));

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(map_io_error(reset), Error::ConnectionLost(_)));
    }
}
