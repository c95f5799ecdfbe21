//! Port Interfaces
//!
//! Defines the interfaces (ports) between the streaming session and the
//! outside world following the Hexagonal Architecture pattern. These are the
//! contracts that infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Connector`: Opens an authenticated session to a feed endpoint
//! - `Transport`: One open full-duplex text session
//!
//! ## Driver Ports (Inbound)
//!
//! - `MessageHandler`: Caller-supplied sink for decoded messages

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::market_data::{InboundMessage, ProtocolDecodeError};
use crate::domain::streaming::ConnectionTarget;

// =============================================================================
// Errors
// =============================================================================

/// Failure to open a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The server rejected the credential. Never retried.
    #[error("authentication rejected: {reason}")]
    Auth {
        /// HTTP status of the rejected handshake, if the server answered.
        status: Option<u16>,
        /// Server or client supplied reason.
        reason: String,
    },

    /// The endpoint cannot be reached as configured. Never retried.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Network-level or server-side failure worth retrying.
    #[error("connection failed: {0}")]
    Transient(String),
}

impl ConnectError {
    /// Whether the failure is an authentication rejection.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Whether retrying cannot help.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Transient(_))
    }
}

/// Failure to write a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The session is closed or closing.
    #[error("session closed")]
    Closed,

    /// The write failed on the wire.
    #[error("send failed: {0}")]
    Network(String),
}

/// How a session ended while reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiveError {
    /// The peer closed the session with a close frame.
    #[error("closed by peer (code {code:?}): {reason}")]
    Closed {
        /// Close code, when the peer sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },

    /// The session broke without a close handshake (reset, heartbeat timeout).
    #[error("connection lost: {0}")]
    Network(String),

    /// One frame carried no usable text. The session is still open.
    #[error("unreadable frame: {0}")]
    Malformed(ProtocolDecodeError),
}

impl ReceiveError {
    /// Whether the peer performed a close handshake.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

// =============================================================================
// Driven Ports
// =============================================================================

/// One open, authenticated session.
///
/// `send` and `receive` may be called concurrently from different tasks;
/// calls of the same kind are serialized by the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one text frame.
    ///
    /// # Errors
    ///
    /// Returns `SendError` if the session is closed or the write fails.
    async fn send(&self, text: String) -> Result<(), SendError>;

    /// Wait for the next text frame.
    ///
    /// # Errors
    ///
    /// Returns `ReceiveError` once the session has ended, or
    /// `ReceiveError::Malformed` for a single frame that is not text.
    async fn receive(&self) -> Result<String, ReceiveError>;

    /// Close the session. Idempotent.
    async fn close(&self);
}

/// Opens sessions against a connection target.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new session.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError::Auth` when the credential is rejected and
    /// `ConnectError::Transient` for everything else.
    async fn open(&self, target: &ConnectionTarget) -> Result<Arc<dyn Transport>, ConnectError>;
}

// =============================================================================
// Driver Ports
// =============================================================================

/// Receives every decoded message, in arrival order, one at a time.
///
/// Implemented for `FnMut(InboundMessage)` closures, tokio unbounded senders
/// and std mpsc senders, so a channel can be passed directly.
#[cfg_attr(test, mockall::automock)]
pub trait MessageHandler: Send + 'static {
    /// Handle one message.
    fn deliver(&mut self, message: InboundMessage);
}

impl<F> MessageHandler for F
where
    F: FnMut(InboundMessage) + Send + 'static,
{
    fn deliver(&mut self, message: InboundMessage) {
        self(message);
    }
}

impl MessageHandler for tokio::sync::mpsc::UnboundedSender<InboundMessage> {
    fn deliver(&mut self, message: InboundMessage) {
        if self.send(message).is_err() {
            tracing::trace!("Message receiver dropped");
        }
    }
}

impl MessageHandler for std::sync::mpsc::Sender<InboundMessage> {
    fn deliver(&mut self, message: InboundMessage) {
        if self.send(message).is_err() {
            tracing::trace!("Message receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market_data::TerminationReason;

    #[test]
    fn closure_handler_receives_messages() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut handler = move |msg: InboundMessage| sink.lock().push(msg.label());
        handler.deliver(InboundMessage::SubscribedTo(vec![]));
        assert_eq!(*seen.lock(), ["subscribed_to"]);
    }

    #[test]
    fn channel_handler_forwards_messages() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut handler = tx;
        handler.deliver(InboundMessage::Terminated(TerminationReason::RetriesExhausted {
            attempts: 5,
        }));
        assert!(matches!(rx.try_recv(), Ok(InboundMessage::Terminated(_))));
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (tx, rx) = std::sync::mpsc::channel();
        drop(rx);
        let mut handler = tx;
        handler.deliver(InboundMessage::SubscribedTo(vec![]));
    }

    #[test]
    fn mock_handler_expectations() {
        let mut handler = MockMessageHandler::new();
        handler
            .expect_deliver()
            .withf(|msg| msg.label() == "subscribed_to")
            .times(1)
            .return_const(());
        handler.deliver(InboundMessage::SubscribedTo(vec![]));
    }

    #[test]
    fn error_classification() {
        let auth = ConnectError::Auth {
            status: Some(401),
            reason: "invalid token".into(),
        };
        assert!(auth.is_auth());
        assert!(auth.is_fatal());
        assert!(ConnectError::InvalidEndpoint("ftp://x".into()).is_fatal());
        assert!(!ConnectError::Transient("reset".into()).is_auth());
        assert!(!ConnectError::Transient("reset".into()).is_fatal());
        assert!(
            ReceiveError::Closed {
                code: Some(1000),
                reason: String::new()
            }
            .is_clean()
        );
        assert!(!ReceiveError::Network("eof".into()).is_clean());

        let malformed = ReceiveError::Malformed(ProtocolDecodeError {
            reason: "binary frame is not UTF-8".into(),
            raw: "\u{fffd}".into(),
        });
        assert!(!malformed.is_clean());
    }
}
