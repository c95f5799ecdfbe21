//! Streaming Client
//!
//! [`StreamClient`] is the handle an application holds for one feed. It is
//! cheap to clone; clones share the same session, so one task can run the
//! stream while others subscribe, query and close.
//!
//! # Example
//!
//! ```rust,no_run
//! use dataservices_stream::{
//!     ConnectionTarget, Credential, Exchange, InboundMessage, StreamClient, StreamClientConfig,
//!     StreamKind, StreamVariant, SubscribeOptions,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let target =
//!     ConnectionTarget::new(StreamKind::Trades, StreamVariant::Realtime, Exchange::B3, None)?;
//! let config = StreamClientConfig::new(target, Credential::new("token")?)
//!     .with_instruments(["PETR4"]);
//!
//! let client = StreamClient::new(config)?;
//! client
//!     .run(|msg: InboundMessage| println!("{msg:?}"))
//!     .await?;
//! client.subscribe(["VALE3"], SubscribeOptions::default()).await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::auth::Credential;
use super::heartbeat::HeartbeatConfig;
use super::messages::ControlFrame;
use super::reconnect::ReconnectConfig;
use super::session::{self, SessionShared};
use super::transport::WsConnector;
use crate::application::ports::{ConnectError, Connector, MessageHandler, SendError};
use crate::domain::market_data::TerminationReason;
use crate::domain::streaming::{ConnectionState, ConnectionTarget, StreamKind};
use crate::domain::subscription::{
    SubscribeOptions, SubscriptionEntry, SubscriptionRequest, Symbol,
};
use crate::domain::validation::ValidationError;
use crate::infrastructure::config::{ClientSettings, ReplayStrategy, WebSocketSettings};

/// Upper bound on how long `close` waits for the background loop.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Where the dispatch loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// `run` spawns the loop on the tokio runtime and returns once started.
    #[default]
    Background,
    /// `run` drives the loop itself and returns only when the client ends.
    Cooperative,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Feed endpoint.
    pub target: ConnectionTarget,
    /// Bearer token.
    pub credential: Credential,
    /// Instruments subscribed when the stream first opens.
    pub initial_instruments: Vec<Symbol>,
    /// Options applied to the initial instruments.
    pub initial_options: SubscribeOptions,
    /// Dispatch loop scheduling.
    pub execution: ExecutionMode,
    /// Heartbeat, handshake and reconnection settings.
    pub websocket: WebSocketSettings,
    /// Replay strategy after reconnects.
    pub replay: ReplayStrategy,
}

impl StreamClientConfig {
    /// Configuration with defaults for everything but target and credential.
    #[must_use]
    pub fn new(target: ConnectionTarget, credential: Credential) -> Self {
        Self {
            target,
            credential,
            initial_instruments: Vec::new(),
            initial_options: SubscribeOptions::default(),
            execution: ExecutionMode::default(),
            websocket: WebSocketSettings::default(),
            replay: ReplayStrategy::default(),
        }
    }

    /// Build from environment-derived settings.
    #[must_use]
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            initial_instruments: settings.instruments.clone(),
            websocket: settings.websocket.clone(),
            replay: settings.replay,
            ..Self::new(settings.target.clone(), settings.credential.clone())
        }
    }

    /// Set the initial instruments.
    #[must_use]
    pub fn with_instruments<I, S>(mut self, instruments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        self.initial_instruments = instruments.into_iter().map(Into::into).collect();
        self
    }

    /// Set the options applied to the initial instruments.
    #[must_use]
    pub const fn with_initial_options(mut self, options: SubscribeOptions) -> Self {
        self.initial_options = options;
        self
    }

    /// Set the execution mode.
    #[must_use]
    pub const fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    /// Set the WebSocket settings.
    #[must_use]
    pub fn with_websocket(mut self, websocket: WebSocketSettings) -> Self {
        self.websocket = websocket;
        self
    }

    /// Set the replay strategy.
    #[must_use]
    pub const fn with_replay(mut self, replay: ReplayStrategy) -> Self {
        self.replay = replay;
        self
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced by client calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Bad arguments; nothing was changed or sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The credential was rejected on the first open.
    #[error("authentication failed: {0}")]
    Auth(ConnectError),

    /// The first open failed in a way retrying cannot fix.
    #[error("connection failed: {0}")]
    Connect(ConnectError),

    /// `run` was already called on this client.
    #[error("client is already running")]
    AlreadyRunning,

    /// The client is closed or was never started.
    #[error("client is not running")]
    NotRunning,

    /// The session is between connections; retry once connected.
    #[error("client is not connected")]
    NotConnected,

    /// A query frame could not be written.
    #[error("failed to send request: {0}")]
    Send(#[from] SendError),

    /// The client ended on its own.
    #[error("stream terminated: {0}")]
    Terminated(TerminationReason),
}

// =============================================================================
// Client
// =============================================================================

struct Inner {
    shared: Arc<SessionShared>,
    connector: Arc<dyn Connector>,
    reconnect: ReconnectConfig,
    execution: ExecutionMode,
    started: AtomicBool,
    finished: CancellationToken,
}

/// Streaming client for one Data Services feed.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("target", self.inner.shared.target())
            .field("state", &self.state())
            .field("subscriptions", &self.inner.shared.registry().len())
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a client that connects over WebSocket.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` if the initial instruments are
    /// invalid for the target's stream kind.
    pub fn new(config: StreamClientConfig) -> Result<Self, ClientError> {
        let connector = WsConnector::new(
            config.credential.clone(),
            HeartbeatConfig::from_websocket_settings(&config.websocket),
            config.websocket.handshake_timeout,
        )
        .with_send_timeout(config.websocket.send_timeout);
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a client over a custom connector.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` if the initial instruments are
    /// invalid for the target's stream kind.
    pub fn with_connector(
        config: StreamClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ClientError> {
        let shared = SessionShared::new(
            config.target,
            config.replay,
            config.websocket.send_timeout,
        );

        if !config.initial_instruments.is_empty() {
            let request = SubscriptionRequest::new(
                shared.target().kind(),
                &config.initial_instruments,
                config.initial_options,
            )?;
            shared.registry().add_all(request.entries());
        }

        Ok(Self {
            inner: Arc::new(Inner {
                shared: Arc::new(shared),
                connector,
                reconnect: ReconnectConfig::from_websocket_settings(&config.websocket),
                execution: config.execution,
                started: AtomicBool::new(false),
                finished: CancellationToken::new(),
            }),
        })
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Open the stream and start delivering messages to `handler`.
    ///
    /// The initial instruments and anything subscribed before `run` are sent
    /// once the session opens. A transient failure of the first open is
    /// retried in the background like any later loss.
    ///
    /// In [`ExecutionMode::Background`] this returns once the loop is
    /// spawned. In [`ExecutionMode::Cooperative`] it returns when the client
    /// is closed or terminates.
    ///
    /// # Errors
    ///
    /// - `AlreadyRunning` on a second call
    /// - `NotRunning` if the client was closed before it started
    /// - `Auth` / `Connect` if the first open fails fatally
    /// - `Terminated` (cooperative mode) if reconnection gave up
    pub async fn run<H: MessageHandler>(&self, handler: H) -> Result<(), ClientError> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyRunning);
        }
        let finished = inner.finished.clone().drop_guard();

        let shared = &inner.shared;
        let cancel = shared.cancel_token();
        if cancel.is_cancelled() {
            return Err(ClientError::NotRunning);
        }

        shared.set_state(ConnectionState::Connecting);
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                shared.set_state(ConnectionState::Closed);
                return Ok(());
            }
            opened = inner.connector.open(shared.target()) => opened,
        };

        let initial = match opened {
            Ok(transport) => Some(transport),
            Err(e) if e.is_fatal() => {
                tracing::error!(stream = shared.stream(), error = %e, "Failed to open stream");
                shared.set_state(ConnectionState::Closed);
                return Err(if e.is_auth() {
                    ClientError::Auth(e)
                } else {
                    ClientError::Connect(e)
                });
            }
            Err(e) => {
                tracing::warn!(stream = shared.stream(), error = %e, "Initial connection failed, retrying");
                None
            }
        };

        let task = session::drive(
            Arc::clone(shared),
            Arc::clone(&inner.connector),
            inner.reconnect.clone(),
            Box::new(handler),
            initial,
        );

        match inner.execution {
            ExecutionMode::Background => {
                tokio::spawn(async move {
                    let _finished = finished;
                    task.await;
                });
                Ok(())
            }
            ExecutionMode::Cooperative => {
                let outcome = task.await;
                drop(finished);
                outcome.map_or(Ok(()), |reason| Err(ClientError::Terminated(reason)))
            }
        }
    }

    /// Shut the client down.
    ///
    /// Cancels any reconnect in progress, closes the transport and waits for
    /// the loop to stop. No handler call happens after this returns.
    /// Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        inner.shared.cancel_token().cancel();

        if inner.started.load(Ordering::SeqCst)
            && tokio::time::timeout(CLOSE_TIMEOUT, inner.finished.cancelled())
                .await
                .is_err()
        {
            tracing::warn!(stream = inner.shared.stream(), "Stream loop did not stop in time");
        }

        inner.shared.shutdown().await;
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Subscribe to instruments.
    ///
    /// The registry is updated first. The frame is sent right away when
    /// connected; otherwise the subscription goes out with the next replay.
    /// Re-subscribing a key replaces its options.
    ///
    /// # Errors
    ///
    /// `Validation` for bad arguments (nothing changes), `NotRunning` once
    /// closed.
    pub async fn subscribe<I, S>(&self, symbols: I, options: SubscribeOptions) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let shared = &self.inner.shared;
        let request = SubscriptionRequest::new(shared.target().kind(), symbols, options)?;
        self.ensure_not_closed()?;

        let link = shared.link().await;
        shared.registry().add_all(request.entries());

        if let Some(transport) = link.as_ref()
            && let Err(e) = shared
                .send_frame(transport.as_ref(), &ControlFrame::subscribe(&request))
                .await
        {
            tracing::warn!(
                stream = shared.stream(),
                error = %e,
                "Subscribe not sent, will be replayed on reconnect"
            );
        }
        Ok(())
    }

    /// Unsubscribe from instruments.
    ///
    /// Keys are matched on symbol and candle type; depth is ignored.
    ///
    /// # Errors
    ///
    /// `Validation` for bad arguments (nothing changes), `NotRunning` once
    /// closed.
    pub async fn unsubscribe<I, S>(
        &self,
        symbols: I,
        options: SubscribeOptions,
    ) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let shared = &self.inner.shared;
        let request = SubscriptionRequest::new(shared.target().kind(), symbols, options)?;
        self.ensure_not_closed()?;

        let link = shared.link().await;
        shared.registry().remove_all(request.keys());

        if let Some(transport) = link.as_ref()
            && let Err(e) = shared
                .send_frame(transport.as_ref(), &ControlFrame::unsubscribe(&request))
                .await
        {
            tracing::warn!(stream = shared.stream(), error = %e, "Unsubscribe not sent");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Ask which instruments the stream offers. The answer arrives as
    /// `InboundMessage::AvailableToSubscribe`.
    ///
    /// # Errors
    ///
    /// `Validation` on news streams, `NotConnected` between sessions,
    /// `NotRunning` before `run` or after close, `Send` if the write fails.
    pub async fn available_to_subscribe(&self) -> Result<(), ClientError> {
        self.require_market_data("available_to_subscribe")?;
        self.query(ControlFrame::available_to_subscribe()).await
    }

    /// Ask which instruments the server holds for this session. The answer
    /// arrives as `InboundMessage::SubscribedTo`.
    ///
    /// # Errors
    ///
    /// Same as [`available_to_subscribe`](Self::available_to_subscribe).
    pub async fn subscribed_to(&self) -> Result<(), ClientError> {
        self.require_market_data("subscribed_to")?;
        self.query(ControlFrame::subscribed_to()).await
    }

    /// Ask for the last event of one instrument. The answer arrives as
    /// `InboundMessage::LastEvent`.
    ///
    /// # Errors
    ///
    /// Same as [`available_to_subscribe`](Self::available_to_subscribe), plus
    /// `Validation` for a blank ticker.
    pub async fn get_last_event(&self, ticker: &str) -> Result<(), ClientError> {
        self.require_market_data("get_last_event")?;
        let ticker = ticker.trim();
        if ticker.is_empty() {
            return Err(ValidationError::BlankSymbol(0).into());
        }
        self.query(ControlFrame::get_last_event(ticker)).await
    }

    /// Ask for the trading status of instruments. Answers arrive as
    /// `InboundMessage::InstrumentStatus`.
    ///
    /// # Errors
    ///
    /// Same as [`available_to_subscribe`](Self::available_to_subscribe), plus
    /// `Validation` for an empty or blank instrument list.
    pub async fn instrument_status<I, S>(&self, symbols: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let kind = self.require_market_data("instrument_status")?;
        let request = SubscriptionRequest::new(kind, symbols, SubscribeOptions::default())?;
        self.query(ControlFrame::instrument_status(request.symbols().to_vec()))
            .await
    }

    /// Ask a news stream for its latest items.
    ///
    /// # Errors
    ///
    /// `Validation` on market data streams, otherwise as
    /// [`available_to_subscribe`](Self::available_to_subscribe).
    pub async fn latest_news(&self) -> Result<(), ClientError> {
        let kind = self.kind();
        if !kind.is_news() {
            return Err(ValidationError::UnsupportedAction {
                kind: kind.to_string(),
                action: "latest_news",
            }
            .into());
        }
        self.query(ControlFrame::latest_news()).await
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Stream kind of the target.
    #[must_use]
    pub fn kind(&self) -> StreamKind {
        self.inner.shared.target().kind()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.state()
    }

    /// Watch connection state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.state_changes()
    }

    /// Registry contents in replay order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionEntry> {
        self.inner.shared.registry().snapshot()
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn ensure_not_closed(&self) -> Result<(), ClientError> {
        let shared = &self.inner.shared;
        if shared.cancel_token().is_cancelled() || shared.state().is_closed() {
            return Err(ClientError::NotRunning);
        }
        Ok(())
    }

    fn require_market_data(&self, action: &'static str) -> Result<StreamKind, ValidationError> {
        let kind = self.kind();
        if kind.is_news() {
            return Err(ValidationError::UnsupportedAction {
                kind: kind.to_string(),
                action,
            });
        }
        Ok(kind)
    }

    async fn query(&self, frame: ControlFrame) -> Result<(), ClientError> {
        self.ensure_not_closed()?;
        let shared = &self.inner.shared;

        let link = shared.link().await;
        let Some(transport) = link.as_ref() else {
            return Err(if self.inner.started.load(Ordering::SeqCst) {
                ClientError::NotConnected
            } else {
                ClientError::NotRunning
            });
        };

        shared.send_frame(transport.as_ref(), &frame).await?;
        Ok(())
    }
}
