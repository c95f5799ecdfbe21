//! Dispatch Loop
//!
//! Pulls frames from one open transport, decodes them and hands each message
//! to the caller's handler in arrival order. Malformed frames, including
//! binary frames that are not UTF-8, are reported as
//! [`InboundMessage::DecodeError`] and skipped; only a lost session or
//! cancellation ends the loop.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use crate::application::ports::{MessageHandler, ReceiveError, Transport};
use crate::domain::market_data::InboundMessage;
use crate::infrastructure::metrics;

/// Why [`pump`] returned.
#[derive(Debug)]
pub enum PumpExit {
    /// The client was closed.
    Cancelled,
    /// The session ended; the reconnection controller takes over.
    Lost(ReceiveError),
}

/// Deliver messages from `transport` until the session ends or `cancel`
/// fires.
///
/// No message is delivered once `cancel` has fired.
pub async fn pump(
    transport: &dyn Transport,
    codec: &JsonCodec,
    handler: &mut dyn MessageHandler,
    cancel: &CancellationToken,
    stream: &'static str,
) -> PumpExit {
    loop {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => return PumpExit::Cancelled,
            received = transport.receive() => received,
        };

        let messages = match received {
            Ok(text) => match codec.decode(&text) {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(stream, error = %e, "Dropping malformed frame");
                    metrics::record_decode_error(stream);
                    vec![InboundMessage::DecodeError(e.into_protocol_error(&text))]
                }
            },
            Err(ReceiveError::Malformed(e)) => {
                tracing::warn!(stream, error = %e, "Dropping unreadable frame");
                metrics::record_decode_error(stream);
                vec![InboundMessage::DecodeError(e)]
            }
            Err(e) => return PumpExit::Lost(e),
        };

        for message in messages {
            if cancel.is_cancelled() {
                return PumpExit::Cancelled;
            }
            deliver(handler, message, stream);
        }
    }
}

/// Hand one message to the handler, recording metrics.
pub fn deliver(handler: &mut dyn MessageHandler, message: InboundMessage, stream: &'static str) {
    metrics::record_message_received(stream, message.label());
    let started = Instant::now();
    handler.deliver(message);
    metrics::record_handler_duration(stream, started.elapsed());
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::SendError;
    use crate::domain::market_data::ProtocolDecodeError;

    /// Replays a fixed script of receive results, then reports a network loss.
    struct ScriptedTransport {
        frames: Mutex<VecDeque<Result<String, ReceiveError>>>,
    }

    impl ScriptedTransport {
        fn new(frames: Vec<Result<String, ReceiveError>>) -> Self {
            Self {
                frames: Mutex::new(frames.into()),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _text: String) -> Result<(), SendError> {
            Ok(())
        }

        async fn receive(&self) -> Result<String, ReceiveError> {
            self.frames
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ReceiveError::Network("script finished".to_string())))
        }

        async fn close(&self) {}
    }

    fn collecting_handler() -> (Arc<Mutex<Vec<InboundMessage>>>, impl MessageHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |msg: InboundMessage| sink.lock().push(msg))
    }

    #[tokio::test]
    async fn malformed_frame_does_not_stop_delivery() {
        let transport = ScriptedTransport::new(vec![
            Ok(r#"{"ev":"trade","symb":"PETR4","px":38.5}"#.to_string()),
            Ok("{not json".to_string()),
            Ok(r#"{"ev":"trade","symb":"VALE3","px":61.2}"#.to_string()),
        ]);
        let (seen, mut handler) = collecting_handler();
        let cancel = CancellationToken::new();

        let exit = pump(&transport, &JsonCodec::new(), &mut handler, &cancel, "trades").await;

        assert!(matches!(exit, PumpExit::Lost(ReceiveError::Network(_))));
        let seen = seen.lock();
        let labels: Vec<_> = seen.iter().map(InboundMessage::label).collect();
        assert_eq!(labels, ["trade", "decode_error", "trade"]);
        assert_eq!(seen[2].symbol(), Some("VALE3"));
    }

    #[tokio::test]
    async fn unreadable_frame_is_reported_and_skipped() {
        let transport = ScriptedTransport::new(vec![
            Err(ReceiveError::Malformed(ProtocolDecodeError {
                reason: "binary frame is not UTF-8".to_string(),
                raw: "\u{fffd}".to_string(),
            })),
            Ok(r#"{"ev":"trade","symb":"PETR4","px":38.5}"#.to_string()),
        ]);
        let (seen, mut handler) = collecting_handler();
        let cancel = CancellationToken::new();

        let exit = pump(&transport, &JsonCodec::new(), &mut handler, &cancel, "trades").await;

        assert!(matches!(exit, PumpExit::Lost(ReceiveError::Network(_))));
        let seen = seen.lock();
        assert!(matches!(
            &seen[0],
            InboundMessage::DecodeError(e) if e.reason.contains("UTF-8")
        ));
        assert_eq!(seen[1].symbol(), Some("PETR4"));
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn array_frame_delivers_in_order() {
        let transport = ScriptedTransport::new(vec![
            Ok(r#"[{"ev":"trade","symb":"A","px":1},{"ev":"trade","symb":"B","px":2}]"#
                .to_string()),
            Err(ReceiveError::Closed {
                code: Some(1000),
                reason: String::new(),
            }),
        ]);
        let (seen, mut handler) = collecting_handler();
        let cancel = CancellationToken::new();

        let exit = pump(&transport, &JsonCodec::new(), &mut handler, &cancel, "trades").await;

        assert!(matches!(exit, PumpExit::Lost(e) if e.is_clean()));
        let symbols: Vec<_> = seen.lock().iter().filter_map(|m| m.symbol().map(String::from)).collect();
        assert_eq!(symbols, ["A", "B"]);
    }

    #[tokio::test]
    async fn cancelled_pump_delivers_nothing() {
        let transport = ScriptedTransport::new(vec![Ok(
            r#"{"ev":"trade","symb":"PETR4","px":38.5}"#.to_string(),
        )]);
        let (seen, mut handler) = collecting_handler();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let exit = pump(&transport, &JsonCodec::new(), &mut handler, &cancel, "trades").await;

        assert!(matches!(exit, PumpExit::Cancelled));
        assert!(seen.lock().is_empty());
    }
}
