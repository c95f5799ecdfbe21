//! Prometheus Metrics Module
//!
//! Records client metrics through the `metrics` facade. Nothing is exported
//! unless a recorder is installed; the tail binary installs the Prometheus
//! exporter when a metrics port is configured.
//!
//! # Metrics Categories
//!
//! - **Messages**: Frames received and handler deliveries by message type
//! - **Control**: Control frames sent by action, replayed subscriptions
//! - **Connections**: Connection gauge, reconnect attempts, decode errors
//! - **Latency**: Handler delivery time

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// =============================================================================
// Exporter
// =============================================================================

/// Install the Prometheus exporter, serving `/metrics` on `port`.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener
/// cannot be bound.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()?;

    register_metrics();
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "dataservices_stream_messages_received_total",
        "Total decoded messages received from the feed"
    );
    describe_counter!(
        "dataservices_stream_decode_errors_total",
        "Total frames that could not be decoded"
    );
    describe_counter!(
        "dataservices_stream_control_frames_sent_total",
        "Total control frames sent by action"
    );
    describe_counter!(
        "dataservices_stream_replayed_subscriptions_total",
        "Total registry entries replayed after reconnects"
    );
    describe_counter!(
        "dataservices_stream_reconnects_total",
        "Total reconnection attempts"
    );
    describe_gauge!(
        "dataservices_stream_connected",
        "1 while the stream is connected and replayed, 0 otherwise"
    );
    describe_histogram!(
        "dataservices_stream_handler_seconds",
        "Time spent in the message handler per message"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a decoded message.
pub fn record_message_received(stream: &'static str, message_type: &'static str) {
    counter!(
        "dataservices_stream_messages_received_total",
        "stream" => stream,
        "message_type" => message_type
    )
    .increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error(stream: &'static str) {
    counter!("dataservices_stream_decode_errors_total", "stream" => stream).increment(1);
}

/// Record a control frame written to the stream.
pub fn record_control_frame_sent(stream: &'static str, action: &'static str) {
    counter!(
        "dataservices_stream_control_frames_sent_total",
        "stream" => stream,
        "action" => action
    )
    .increment(1);
}

/// Record registry entries restored by a replay.
pub fn record_replayed_subscriptions(stream: &'static str, count: u64) {
    counter!(
        "dataservices_stream_replayed_subscriptions_total",
        "stream" => stream
    )
    .increment(count);
}

/// Record a reconnection attempt.
pub fn record_reconnect(stream: &'static str) {
    counter!("dataservices_stream_reconnects_total", "stream" => stream).increment(1);
}

/// Update the connection gauge.
pub fn set_connected(stream: &'static str, connected: bool) {
    gauge!("dataservices_stream_connected", "stream" => stream).set(if connected {
        1.0
    } else {
        0.0
    });
}

/// Record time spent delivering one message to the handler.
pub fn record_handler_duration(stream: &'static str, duration: Duration) {
    histogram!("dataservices_stream_handler_seconds", "stream" => stream)
        .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_message_received("trades", "trade");
        record_decode_error("trades");
        record_control_frame_sent("trades", "subscribe");
        record_replayed_subscriptions("trades", 3);
        record_reconnect("trades");
        set_connected("trades", true);
        record_handler_duration("trades", Duration::from_micros(5));
    }
}
