//! Shared fixtures for the streaming client integration tests.
//!
//! `FakeConnector` hands out scripted in-memory transports: tests push frames
//! into a session, break it, make its writes fail or hang, and inspect the
//! frames the client wrote.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dataservices_stream::{
    ConnectError, ConnectionState, ConnectionTarget, Connector, Credential, Exchange,
    InboundMessage, ReceiveError, SendError, StreamClient, StreamClientConfig, StreamKind,
    StreamVariant, Transport, WebSocketSettings,
};

/// Default wait for asynchronous conditions.
pub const WAIT: Duration = Duration::from_secs(2);

// =============================================================================
// Fake Transport
// =============================================================================

/// How a fake session treats the client's writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SendBehavior {
    /// Record every write.
    #[default]
    Accept,
    /// Fail the write with this 1-based index; record the others.
    FailAt(usize),
    /// Never complete a write, even after close.
    Stall,
}

/// One scripted session.
pub struct FakeTransport {
    inbound_tx: mpsc::UnboundedSender<Result<String, ReceiveError>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<String, ReceiveError>>>,
    sent: Mutex<Vec<String>>,
    writes: AtomicUsize,
    behavior: SendBehavior,
    closed: CancellationToken,
}

impl FakeTransport {
    fn new(behavior: SendBehavior) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            sent: Mutex::new(Vec::new()),
            writes: AtomicUsize::new(0),
            behavior,
            closed: CancellationToken::new(),
        }
    }

    /// Deliver a text frame to the client.
    pub fn push(&self, frame: &str) {
        let _ = self.inbound_tx.send(Ok(frame.to_string()));
    }

    /// Break the session without a close handshake.
    pub fn drop_connection(&self) {
        let _ = self
            .inbound_tx
            .send(Err(ReceiveError::Network("connection reset by peer".to_string())));
    }

    /// Close the session from the server side.
    pub fn close_from_server(&self) {
        let _ = self.inbound_tx.send(Err(ReceiveError::Closed {
            code: Some(1000),
            reason: "bye".to_string(),
        }));
    }

    /// Frames written by the client, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Frames written by the client, parsed.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    /// Whether the client closed this session.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, text: String) -> Result<(), SendError> {
        let index = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        match self.behavior {
            SendBehavior::Stall => return std::future::pending().await,
            SendBehavior::FailAt(n) if n == index => {
                return Err(SendError::Network("broken pipe".to_string()));
            }
            _ => {}
        }

        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    async fn receive(&self) -> Result<String, ReceiveError> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            () = self.closed.cancelled() => Err(ReceiveError::Closed {
                code: None,
                reason: "closed locally".to_string(),
            }),
            next = rx.recv() => next.unwrap_or_else(|| {
                Err(ReceiveError::Network("script dropped".to_string()))
            }),
        }
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

// =============================================================================
// Fake Connector
// =============================================================================

/// Connector whose open results are scripted.
#[derive(Default)]
pub struct FakeConnector {
    plan: Mutex<VecDeque<Result<(), ConnectError>>>,
    fallback: Mutex<Option<ConnectError>>,
    behaviors: Mutex<VecDeque<SendBehavior>>,
    sessions: Mutex<Vec<Arc<FakeTransport>>>,
    attempts: AtomicUsize,
}

impl FakeConnector {
    /// Connector that opens every session successfully.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the outcome of the next open.
    pub fn then(&self, outcome: Result<(), ConnectError>) {
        self.plan.lock().push_back(outcome);
    }

    /// Set how the next opened session treats writes.
    pub fn then_sends(&self, behavior: SendBehavior) {
        self.behaviors.lock().push_back(behavior);
    }

    /// Fail every unscripted open from now on.
    pub fn fail_always(&self, error: ConnectError) {
        *self.fallback.lock() = Some(error);
    }

    /// Let unscripted opens succeed again.
    pub fn recover(&self) {
        *self.fallback.lock() = None;
    }

    /// Number of `open` calls so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Sessions opened so far.
    pub fn sessions(&self) -> Vec<Arc<FakeTransport>> {
        self.sessions.lock().clone()
    }

    /// Wait until `count` sessions were opened and return the last one.
    pub async fn session(&self, count: usize) -> Arc<FakeTransport> {
        wait_until(|| self.sessions.lock().len() >= count).await;
        Arc::clone(&self.sessions.lock()[count - 1])
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, _target: &ConnectionTarget) -> Result<Arc<dyn Transport>, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let scripted = self.plan.lock().pop_front();
        let outcome = scripted.unwrap_or_else(|| match self.fallback.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        });
        outcome?;

        let behavior = self.behaviors.lock().pop_front().unwrap_or_default();
        let transport = Arc::new(FakeTransport::new(behavior));
        self.sessions.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}

// =============================================================================
// Client Helpers
// =============================================================================

/// Settings with millisecond backoff.
pub fn fast_settings() -> WebSocketSettings {
    WebSocketSettings {
        reconnect_delay_initial: Duration::from_millis(10),
        reconnect_delay_max: Duration::from_millis(50),
        ..WebSocketSettings::default()
    }
}

/// Client configuration for a B3 realtime stream.
pub fn config(kind: StreamKind) -> StreamClientConfig {
    let target = ConnectionTarget::new(kind, StreamVariant::Realtime, Exchange::B3, None).unwrap();
    StreamClientConfig::new(target, Credential::new("test-token").unwrap())
        .with_websocket(fast_settings())
}

/// Build a client over a fake connector.
pub fn client(config: StreamClientConfig, connector: &Arc<FakeConnector>) -> StreamClient {
    StreamClient::with_connector(config, Arc::clone(connector) as Arc<dyn Connector>).unwrap()
}

/// Handler that forwards into a channel.
pub fn channel_handler() -> (
    mpsc::UnboundedSender<InboundMessage>,
    mpsc::UnboundedReceiver<InboundMessage>,
) {
    mpsc::unbounded_channel()
}

/// Wait until the client reaches `state`.
pub async fn wait_for_state(client: &StreamClient, state: ConnectionState) {
    let mut changes = client.state_changes();
    tokio::time::timeout(WAIT, changes.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("client never reached {state:?}, stuck in {:?}", client.state()))
        .unwrap();
}

/// Poll until `condition` holds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Next message from a channel handler.
pub async fn next_message(rx: &mut mpsc::UnboundedReceiver<InboundMessage>) -> InboundMessage {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no message in time")
        .expect("handler channel closed")
}

/// Assert nothing arrives on a channel handler for a short while.
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<InboundMessage>) {
    let next = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(
        !matches!(next, Ok(Some(_))),
        "unexpected message: {next:?}"
    );
}

/// Run `future` with the default timeout.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, future).await.expect("timed out")
}
