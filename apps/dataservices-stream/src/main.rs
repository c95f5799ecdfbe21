//! Data Services Stream Binary
//!
//! Tails one Data Services feed and logs every message.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin dataservices-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATASERVICES_TOKEN`: Issued bearer token
//!
//! ## Optional
//! - `DATASERVICES_STREAM_KIND`: trades | books | candles-1M | news | ... (default: trades)
//! - `DATASERVICES_STREAM_VARIANT`: realtime | delayed | throttle (default: realtime)
//! - `DATASERVICES_EXCHANGE`: b3 | bmv (default: b3)
//! - `DATASERVICES_MARKET_SEGMENT`: stocks | options | derivatives | all
//! - `DATASERVICES_INSTRUMENTS`: Comma separated instruments to subscribe
//! - `DATASERVICES_REPLAY`: per-entry | batched (default: per-entry)
//! - `DATASERVICES_METRICS_PORT`: Prometheus metrics port (default: disabled)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)

use anyhow::Context;
use dataservices_stream::infrastructure::telemetry;
use dataservices_stream::{
    ClientError, ClientSettings, ExecutionMode, InboundMessage, StreamClient, StreamClientConfig,
    init_metrics,
};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Data Services stream");

    let settings = ClientSettings::from_env().context("invalid configuration")?;
    log_config(&settings);

    if let Some(port) = settings.metrics_port {
        init_metrics(port).context("failed to start metrics exporter")?;
        tracing::info!(port, "Metrics exporter listening");
    }

    let config =
        StreamClientConfig::from_settings(&settings).with_execution(ExecutionMode::Cooperative);
    let client = StreamClient::new(config)?;

    let shutdown_client = client.clone();
    tokio::spawn(async move {
        await_shutdown().await;
        shutdown_client.close().await;
    });

    match client.run(log_message).await {
        Ok(()) => {
            tracing::info!("Stream closed");
            Ok(())
        }
        Err(ClientError::Terminated(reason)) => {
            tracing::error!(reason = %reason, "Stream terminated");
            Err(ClientError::Terminated(reason).into())
        }
        Err(e) => Err(e).context("stream failed"),
    }
}

/// Log one message from the feed.
fn log_message(message: InboundMessage) {
    match &message {
        InboundMessage::Trade(trade) => {
            tracing::info!(symbol = %trade.symbol, price = %trade.price, "Trade");
        }
        InboundMessage::Book(book) => {
            tracing::info!(
                symbol = %book.symbol,
                best_bid = ?book.best_bid().map(|l| l.price),
                best_offer = ?book.best_offer().map(|l| l.price),
                "Book"
            );
        }
        InboundMessage::DecodeError(e) => {
            tracing::warn!(error = %e, raw = %e.raw, "Undecodable frame");
        }
        InboundMessage::ServerError(text) => {
            tracing::warn!(error = %text, "Server error");
        }
        other => {
            tracing::info!(kind = other.label(), message = ?other, "Message");
        }
    }
}

/// Log the parsed configuration.
fn log_config(settings: &ClientSettings) {
    tracing::info!(
        stream = %settings.target.kind(),
        variant = settings.target.variant().as_str(),
        exchange = settings.target.exchange().as_str(),
        segment = settings.target.segment().as_str(),
        instruments = settings.instruments.len(),
        replay = settings.replay.as_str(),
        "Configuration loaded"
    );
    tracing::debug!(url = settings.target.url(), credential = %settings.credential, "Endpoint");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, closing stream");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, closing stream");
        }
    }
}
