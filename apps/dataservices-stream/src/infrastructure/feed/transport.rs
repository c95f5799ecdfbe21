//! WebSocket Transport
//!
//! `tokio-tungstenite` implementation of the [`Connector`] and [`Transport`]
//! ports. The socket is split into a write half behind the send-side lock
//! and a read half owned by whoever calls `receive` (the dispatch loop).
//!
//! Liveness is watched by a [`HeartbeatMonitor`] in the read half: pings go
//! out on the heartbeat interval from inside `receive`, and silence after a
//! ping ends the session with `ReceiveError::Network`. Writes are bounded by
//! the send timeout; a write that stalls past it kills the session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::auth::{Credential, classify_handshake_error, handshake_request};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor};
use crate::application::ports::{ConnectError, Connector, ReceiveError, SendError, Transport};
use crate::domain::market_data::ProtocolDecodeError;
use crate::domain::streaming::ConnectionTarget;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Time allowed for the close handshake on shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Write bound used unless the connector is given one.
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Connector
// =============================================================================

/// Opens authenticated WebSocket sessions to Data Services endpoints.
#[derive(Debug, Clone)]
pub struct WsConnector {
    credential: Credential,
    heartbeat: HeartbeatConfig,
    handshake_timeout: Duration,
    send_timeout: Duration,
}

impl WsConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new(
        credential: Credential,
        heartbeat: HeartbeatConfig,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            credential,
            heartbeat,
            handshake_timeout,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Bound each frame write.
    #[must_use]
    pub const fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, target: &ConnectionTarget) -> Result<Arc<dyn Transport>, ConnectError> {
        install_crypto_provider();

        let request = handshake_request(target.url(), &self.credential)?;

        tracing::info!(
            url = target.url(),
            stream = %target.kind(),
            variant = target.variant().as_str(),
            "Connecting to Data Services stream"
        );

        let (ws_stream, _response) =
            tokio::time::timeout(self.handshake_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    ConnectError::Transient(format!(
                        "handshake timed out after {:?}",
                        self.handshake_timeout
                    ))
                })?
                .map_err(classify_handshake_error)?;

        Ok(Arc::new(WsTransport::start(
            ws_stream,
            self.heartbeat.clone(),
            self.send_timeout,
        )))
    }
}

/// Install the ring crypto provider for rustls. Later calls are no-ops.
fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

// =============================================================================
// Transport
// =============================================================================

struct ReadHalf {
    stream: SplitStream<WsStream>,
    heartbeat: HeartbeatMonitor,
}

/// One open WebSocket session.
pub struct WsTransport {
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<ReadHalf>,
    closed: CancellationToken,
    send_timeout: Duration,
}

impl WsTransport {
    fn start(ws_stream: WsStream, heartbeat: HeartbeatConfig, send_timeout: Duration) -> Self {
        let (write, read) = ws_stream.split();

        Self {
            writer: Mutex::new(write),
            reader: Mutex::new(ReadHalf {
                stream: read,
                heartbeat: HeartbeatMonitor::new(heartbeat),
            }),
            closed: CancellationToken::new(),
            send_timeout,
        }
    }

    /// Write one frame. Gives up as soon as the session closes; a write that
    /// outlasts the send timeout closes the session.
    async fn write(&self, message: Message) -> Result<(), SendError> {
        let written = async { self.writer.lock().await.send(message).await };

        let result = tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(SendError::Closed),
            result = tokio::time::timeout(self.send_timeout, written) => result,
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => {
                Err(SendError::Closed)
            }
            Ok(Err(e)) => Err(SendError::Network(e.to_string())),
            Err(_) => {
                tracing::warn!(timeout = ?self.send_timeout, "Frame write stalled");
                self.closed.cancel();
                Err(SendError::Network(format!(
                    "write timed out after {:?}",
                    self.send_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, text: String) -> Result<(), SendError> {
        self.write(Message::Text(text.into())).await
    }

    async fn receive(&self) -> Result<String, ReceiveError> {
        let mut guard = self.reader.lock().await;
        let read = &mut *guard;

        loop {
            tokio::select! {
                () = self.closed.cancelled() => {
                    return Err(ReceiveError::Closed {
                        code: None,
                        reason: "closed locally".to_string(),
                    });
                }
                event = read.heartbeat.next_event() => {
                    match event {
                        HeartbeatEvent::SendPing => {
                            self.write(Message::Ping(Vec::new().into()))
                                .await
                                .map_err(|e| ReceiveError::Network(e.to_string()))?;
                            read.heartbeat.ping_sent();
                        }
                        HeartbeatEvent::Timeout => {
                            let error = read.heartbeat.timeout_error();
                            tracing::warn!(error = %error, "No frames after ping");
                            self.closed.cancel();
                            return Err(ReceiveError::Network(error.to_string()));
                        }
                    }
                }
                msg = read.stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            read.heartbeat.frame_received();
                            return Ok(text.as_str().to_owned());
                        }
                        Some(Ok(Message::Binary(data))) => {
                            read.heartbeat.frame_received();
                            return String::from_utf8(data.to_vec()).map_err(|e| {
                                ReceiveError::Malformed(ProtocolDecodeError {
                                    reason: format!("binary frame is not UTF-8: {e}"),
                                    raw: String::from_utf8_lossy(e.as_bytes()).into_owned(),
                                })
                            });
                        }
                        Some(Ok(Message::Pong(_))) => {
                            read.heartbeat.frame_received();
                        }
                        Some(Ok(Message::Ping(data))) => {
                            read.heartbeat.frame_received();
                            self.write(Message::Pong(data))
                                .await
                                .map_err(|e| ReceiveError::Network(e.to_string()))?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            self.closed.cancel();
                            let (code, reason) = frame.map_or((None, String::new()), |f| {
                                (Some(u16::from(f.code)), f.reason.as_str().to_owned())
                            });
                            return Err(ReceiveError::Closed { code, reason });
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            self.closed.cancel();
                            return Err(ReceiveError::Network(e.to_string()));
                        }
                        None => {
                            self.closed.cancel();
                            return Err(ReceiveError::Network(
                                "stream ended without close frame".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();

        let closing = async { self.writer.lock().await.close().await };
        if tokio::time::timeout(CLOSE_TIMEOUT, closing).await.is_err() {
            tracing::debug!("Close handshake timed out");
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
