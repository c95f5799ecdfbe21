//! Session State and Reconnection Controller
//!
//! [`SessionShared`] is the state one client shares between the caller's
//! tasks and its background loop: the registry, the connection state and the
//! send-side link to the current transport.
//!
//! [`drive`] is the controller loop:
//!
//! ```text
//! Connecting ─┐
//!             ├─► Replaying ──► Connected ──(loss)──► Reconnecting ─┐
//! Reconnecting┘                                                      │
//!      ▲                                                             │
//!      └──────────────────────(open fails, budget left)──────────────┘
//!
//! Reconnecting ──(budget spent / auth rejected)──► Closed
//! ```
//!
//! The link is `Some` only while `Connected`. Facade calls that arrive while
//! it is `None` update the registry and leave the wire alone; replay holds
//! the link lock from snapshot until `Connected`, so no update is lost.
//!
//! Every write made under the link lock gives up when the client is closed
//! and is bounded by the send timeout, so a stalled peer never holds the lock
//! past `close`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, watch};
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use super::dispatch::{self, PumpExit};
use super::messages::ControlFrame;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{Connector, MessageHandler, SendError, Transport};
use crate::domain::market_data::{InboundMessage, TerminationReason};
use crate::domain::streaming::{ConnectionState, ConnectionTarget};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::config::ReplayStrategy;
use crate::infrastructure::metrics;

/// Send-side link to the current transport.
pub type Link = Option<Arc<dyn Transport>>;

// =============================================================================
// Shared Session State
// =============================================================================

/// State shared by a client's handles and its background loop.
pub struct SessionShared {
    target: ConnectionTarget,
    codec: JsonCodec,
    registry: SubscriptionRegistry,
    replay: ReplayStrategy,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Link>,
    cancel: CancellationToken,
    send_timeout: Duration,
}

impl SessionShared {
    /// Create session state for a target.
    #[must_use]
    pub fn new(target: ConnectionTarget, replay: ReplayStrategy, send_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            codec: JsonCodec::for_kind(target.kind()),
            target,
            registry: SubscriptionRegistry::new(),
            replay,
            state,
            link: Mutex::new(None),
            cancel: CancellationToken::new(),
            send_timeout,
        }
    }

    /// Connection target.
    #[must_use]
    pub const fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// Subscription registry.
    #[must_use]
    pub const fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Token cancelled by `close`.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn stream(&self) -> &'static str {
        self.target.kind().label()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Move to a new state. `Closed` is terminal.
    pub fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if current.is_closed() || *current == next {
                return false;
            }
            *current = next;
            true
        });

        if changed {
            tracing::debug!(stream = self.stream(), state = ?next, "Connection state changed");
            metrics::set_connected(self.stream(), next.is_connected());
        }
    }

    /// Lock the send-side link.
    pub async fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().await
    }

    /// Encode and write one control frame.
    ///
    /// A write still pending when the client closes is abandoned. One that
    /// outlasts the send timeout closes `transport`, which the dispatch loop
    /// then reports as a lost session.
    ///
    /// # Errors
    ///
    /// Returns `SendError::Closed` if the client closed first, otherwise
    /// `SendError` if the frame cannot be encoded or written in time.
    pub async fn send_frame(
        &self,
        transport: &dyn Transport,
        frame: &ControlFrame,
    ) -> Result<(), SendError> {
        let text = self
            .codec
            .encode(frame)
            .map_err(|e| SendError::Network(e.to_string()))?;

        tracing::debug!(stream = self.stream(), frame = %text, "Sending control frame");
        let written = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(SendError::Closed),
            written = tokio::time::timeout(self.send_timeout, transport.send(text)) => written,
        };

        match written {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    stream = self.stream(),
                    timeout = ?self.send_timeout,
                    "Control frame write stalled, dropping session"
                );
                transport.close().await;
                return Err(SendError::Network(format!(
                    "write timed out after {:?}",
                    self.send_timeout
                )));
            }
        }

        metrics::record_control_frame_sent(self.stream(), frame.action.as_str());
        Ok(())
    }

    /// Replay the registry over a freshly opened transport, then publish it.
    ///
    /// The link stays locked for the whole replay so facade calls made
    /// meanwhile are either part of the snapshot or sent after it.
    ///
    /// # Errors
    ///
    /// Returns `SendError` if any replay frame cannot be written; the link is
    /// left unset.
    pub async fn replay(&self, transport: Arc<dyn Transport>) -> Result<usize, SendError> {
        let mut link = self.link.lock().await;
        self.set_state(ConnectionState::Replaying);

        let entries = self.registry.snapshot();
        let frames = match self.replay {
            ReplayStrategy::PerEntry => entries.iter().map(ControlFrame::replay_entry).collect(),
            ReplayStrategy::Batched => ControlFrame::replay_batched(&entries),
        };

        for frame in &frames {
            self.send_frame(transport.as_ref(), frame).await?;
        }

        metrics::record_replayed_subscriptions(self.stream(), entries.len() as u64);
        *link = Some(transport);
        self.set_state(ConnectionState::Connected);
        Ok(entries.len())
    }

    /// Unpublish the current transport after a loss.
    pub async fn mark_lost(&self) {
        self.link.lock().await.take();
        self.set_state(ConnectionState::Reconnecting);
    }

    /// Close the published transport, if any, and enter `Closed`.
    pub async fn shutdown(&self) {
        let transport = self.link.lock().await.take();
        if let Some(transport) = transport {
            transport.close().await;
        }
        self.set_state(ConnectionState::Closed);
    }
}

// =============================================================================
// Controller
// =============================================================================

enum Reopen {
    Opened(Arc<dyn Transport>),
    Cancelled,
    GaveUp(TerminationReason),
}

/// Run the session until it is closed or reconnection gives up.
///
/// Starts from `initial` when the first open already succeeded, otherwise
/// from a reconnect. Returns the termination reason when the session ended on
/// its own; the handler has then already received
/// [`InboundMessage::Terminated`] as its last message.
pub async fn drive(
    shared: Arc<SessionShared>,
    connector: Arc<dyn Connector>,
    reconnect: ReconnectConfig,
    mut handler: Box<dyn MessageHandler>,
    initial: Option<Arc<dyn Transport>>,
) -> Option<TerminationReason> {
    let stream = shared.stream();
    let cancel = shared.cancel_token().clone();
    let mut policy = ReconnectPolicy::new(reconnect);
    let mut current = initial;

    let outcome = loop {
        let transport = match current.take() {
            Some(transport) => transport,
            None => match reopen(&shared, connector.as_ref(), &mut policy).await {
                Reopen::Opened(transport) => transport,
                Reopen::Cancelled => break None,
                Reopen::GaveUp(reason) => break Some(reason),
            },
        };

        let replayed = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                transport.close().await;
                break None;
            }
            replayed = shared.replay(Arc::clone(&transport)) => replayed,
        };

        match replayed {
            Ok(count) => {
                policy.reset();
                tracing::info!(stream, subscriptions = count, "Stream connected");
            }
            Err(e) => {
                tracing::warn!(stream, error = %e, "Replay failed");
                shared.mark_lost().await;
                transport.close().await;
                continue;
            }
        }

        match dispatch::pump(transport.as_ref(), &shared.codec, handler.as_mut(), &cancel, stream)
            .await
        {
            PumpExit::Cancelled => {
                transport.close().await;
                break None;
            }
            PumpExit::Lost(e) => {
                if e.is_clean() {
                    tracing::info!(stream, reason = %e, "Stream closed by server");
                } else {
                    tracing::warn!(stream, error = %e, "Stream connection lost");
                }
                shared.mark_lost().await;
                transport.close().await;
            }
        }
    };

    if let Some(reason) = &outcome {
        tracing::error!(stream, reason = %reason, "Stream terminated");
        if !cancel.is_cancelled() {
            dispatch::deliver(
                handler.as_mut(),
                InboundMessage::Terminated(reason.clone()),
                stream,
            );
        }
    }

    shared.shutdown().await;
    outcome
}

async fn reopen(
    shared: &SessionShared,
    connector: &dyn Connector,
    policy: &mut ReconnectPolicy,
) -> Reopen {
    let stream = shared.stream();
    let cancel = shared.cancel_token();

    loop {
        shared.set_state(ConnectionState::Reconnecting);

        let Some(delay) = policy.next_delay() else {
            tracing::warn!(stream, error = %policy.exhausted(), "Giving up on reconnection");
            return Reopen::GaveUp(TerminationReason::RetriesExhausted {
                attempts: policy.attempt_count(),
            });
        };

        let attempt = policy.attempt_count();
        metrics::record_reconnect(stream);
        tracing::info!(
            stream,
            attempt,
            delay_ms = delay.as_millis(),
            "Reconnecting to stream"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!(stream, "Cancelled during reconnect delay");
                return Reopen::Cancelled;
            }
            () = tokio::time::sleep(delay) => {}
        }

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return Reopen::Cancelled,
            opened = connector.open(shared.target()) => opened,
        };

        match opened {
            Ok(transport) => return Reopen::Opened(transport),
            Err(e) if e.is_auth() => {
                return Reopen::GaveUp(TerminationReason::AuthRejected(e.to_string()));
            }
            Err(e) if e.is_fatal() => {
                return Reopen::GaveUp(TerminationReason::Unrecoverable(e.to_string()));
            }
            Err(e) => {
                tracing::warn!(stream, attempt, error = %e, "Reconnect attempt failed");
            }
        }
    }
}
