//! Logging and Trace Export
//!
//! Installs the global `tracing` subscriber for the stream binary: a fmt
//! layer filtered by `RUST_LOG`, plus an OTLP span exporter when enabled.
//! Spans are tagged with the stream being tailed so traces from several
//! tails can be told apart in one collector.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Filter directives (default: [`DEFAULT_FILTER`])
//! - `OTEL_ENABLED`: "true" or "1" to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: dataservices-stream)
//! - `DATASERVICES_STREAM_KIND`: Recorded as the `dataservices.stream` resource attribute
//!
//! # Usage
//!
//! ```ignore
//! use dataservices_stream::infrastructure::telemetry;
//!
//! // Keep the guard alive until exit; dropping it flushes pending spans
//! let _guard = telemetry::init()?;
//! ```

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str =
    "info,dataservices_stream=info,tungstenite=warn,tokio_tungstenite=warn,rustls=warn,h2=warn";

const DEFAULT_SERVICE_NAME: &str = "dataservices-stream";

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Resource attribute carrying the stream label.
const STREAM_ATTRIBUTE: &str = "dataservices.stream";

// =============================================================================
// Errors
// =============================================================================

/// Failures while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// `RUST_LOG` could not be parsed.
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    /// The OTLP exporter could not be built.
    #[error("failed to build OTLP exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    /// A global subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

// =============================================================================
// Configuration
// =============================================================================

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Export spans over OTLP.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
    /// Stream label attached to exported spans.
    pub stream: Option<String>,
    /// Filter directives; [`DEFAULT_FILTER`] when unset.
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            stream: None,
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            enabled: non_empty("OTEL_ENABLED")
                .is_some_and(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1")),
            otlp_endpoint: non_empty("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or(defaults.otlp_endpoint),
            service_name: non_empty("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            stream: non_empty("DATASERVICES_STREAM_KIND").map(|v| v.trim().to_lowercase()),
            log_filter: non_empty("RUST_LOG"),
        }
    }

    /// Build the level filter.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::Filter` if the directives do not parse.
    pub fn filter(&self) -> Result<EnvFilter, TelemetryError> {
        let directives = self.log_filter.as_deref().unwrap_or(DEFAULT_FILTER);
        Ok(EnvFilter::try_new(directives)?)
    }

    fn resource(&self) -> Resource {
        let builder = Resource::builder().with_service_name(self.service_name.clone());
        match &self.stream {
            Some(stream) => builder
                .with_attribute(KeyValue::new(STREAM_ATTRIBUTE, stream.clone()))
                .build(),
            None => builder.build(),
        }
    }
}

// =============================================================================
// Installation
// =============================================================================

/// Flushes and shuts down span export when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shut down span export: {e}");
        }
    }
}

/// Install the subscriber configured from the environment.
///
/// # Errors
///
/// See [`init_with_config`].
pub fn init() -> Result<TelemetryGuard, TelemetryError> {
    init_with_config(&TelemetryConfig::from_env())
}

/// Install the subscriber for `config`.
///
/// # Errors
///
/// Returns `TelemetryError` if the filter is invalid, the exporter cannot be
/// built, or a global subscriber already exists.
pub fn init_with_config(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let registry = tracing_subscriber::registry()
        .with(config.filter()?)
        .with(fmt_layer);

    if !config.enabled {
        registry.try_init()?;
        return Ok(TelemetryGuard {
            tracer_provider: None,
        });
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .build();

    let tracer = tracer_provider.tracer(config.service_name.clone());
    registry
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()?;

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
    })
}
