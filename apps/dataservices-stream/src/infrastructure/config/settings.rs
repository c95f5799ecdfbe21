//! Client Configuration Settings
//!
//! Configuration types for the streaming client, loaded from environment
//! variables.

use std::time::Duration;

use crate::domain::streaming::{
    ConnectionTarget, DEFAULT_BASE_URL, Exchange, MarketSegment, StreamKind, StreamVariant,
};
use crate::domain::subscription::Symbol;
use crate::domain::validation::ValidationError;
use crate::infrastructure::feed::auth::{AuthError, Credential};

/// How the registry is replayed after a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayStrategy {
    /// One subscribe frame per registry entry.
    #[default]
    PerEntry,
    /// Consecutive entries sharing stream kind and parameters in one frame.
    Batched,
}

impl ReplayStrategy {
    /// Parse a strategy from string, defaulting to per-entry.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "batched" | "batch" => Self::Batched,
            _ => Self::PerEntry,
        }
    }

    /// Strategy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PerEntry => "per-entry",
            Self::Batched => "batched",
        }
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat timeout before considering connection dead.
    pub heartbeat_timeout: Duration,
    /// Time allowed for the TCP/TLS/upgrade handshake.
    pub handshake_timeout: Duration,
    /// Time allowed for one frame write before the session is dropped.
    pub send_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Maximum time spent reconnecting before giving up (`None` = unbounded).
    pub max_reconnect_elapsed: Option<Duration>,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(20),
            handshake_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
            max_reconnect_elapsed: None,
        }
    }
}

/// Complete client configuration for the tail binary.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Resolved feed endpoint.
    pub target: ConnectionTarget,
    /// Bearer token.
    pub credential: Credential,
    /// Instruments subscribed when the stream opens.
    pub instruments: Vec<Symbol>,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Replay strategy after reconnects.
    pub replay: ReplayStrategy,
    /// Prometheus exporter port (`None` = disabled).
    pub metrics_port: Option<u16>,
}

impl ClientSettings {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or the
    /// configured stream does not exist.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or the configured
    /// stream does not exist.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let token = env
            .get("DATASERVICES_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATASERVICES_TOKEN".to_string()))?;
        let credential = Credential::new(token).map_err(|e| match e {
            AuthError::EmptyCredential => ConfigError::EmptyValue("DATASERVICES_TOKEN".to_string()),
            other => ConfigError::InvalidValue {
                key: "DATASERVICES_TOKEN".to_string(),
                reason: other.to_string(),
            },
        })?;

        let kind = match env.get("DATASERVICES_STREAM_KIND") {
            Some(name) => StreamKind::parse(&name).ok_or_else(|| ConfigError::InvalidValue {
                key: "DATASERVICES_STREAM_KIND".to_string(),
                reason: format!("unknown stream kind {name:?}"),
            })?,
            None => StreamKind::default(),
        };

        let variant = match env.get("DATASERVICES_STREAM_VARIANT") {
            Some(name) => StreamVariant::parse(&name).ok_or_else(|| ConfigError::InvalidValue {
                key: "DATASERVICES_STREAM_VARIANT".to_string(),
                reason: format!("unknown stream variant {name:?}"),
            })?,
            None => StreamVariant::default(),
        };

        let exchange = match env.get("DATASERVICES_EXCHANGE") {
            Some(name) => Exchange::parse(&name).ok_or_else(|| ConfigError::InvalidValue {
                key: "DATASERVICES_EXCHANGE".to_string(),
                reason: format!("unknown exchange {name:?}"),
            })?,
            None => Exchange::default(),
        };

        let segment = match env.get("DATASERVICES_MARKET_SEGMENT") {
            Some(name) => Some(MarketSegment::parse(&name).ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: "DATASERVICES_MARKET_SEGMENT".to_string(),
                    reason: format!("unknown market segment {name:?}"),
                }
            })?),
            None => None,
        };

        let base_url = env
            .get("DATASERVICES_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let target = ConnectionTarget::with_base_url(&base_url, kind, variant, exchange, segment)?;

        let instruments = env
            .get("DATASERVICES_INSTRUMENTS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            heartbeat_interval: env.duration_secs(
                "DATASERVICES_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: env.duration_secs(
                "DATASERVICES_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            ),
            handshake_timeout: env.duration_secs(
                "DATASERVICES_HANDSHAKE_TIMEOUT_SECS",
                defaults.handshake_timeout,
            ),
            send_timeout: env.duration_secs(
                "DATASERVICES_SEND_TIMEOUT_SECS",
                defaults.send_timeout,
            ),
            reconnect_delay_initial: env.duration_millis(
                "DATASERVICES_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "DATASERVICES_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "DATASERVICES_RECONNECT_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "DATASERVICES_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            max_reconnect_elapsed: match env.parse::<u64>("DATASERVICES_MAX_RECONNECT_ELAPSED_SECS", 0) {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        };

        let replay = env
            .get("DATASERVICES_REPLAY")
            .map(|s| ReplayStrategy::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let metrics_port = env
            .get("DATASERVICES_METRICS_PORT")
            .and_then(|v| v.parse::<u16>().ok())
            .filter(|port| *port != 0);

        Ok(Self {
            target,
            credential,
            instruments,
            websocket,
            replay,
            metrics_port,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
    /// The configured stream does not exist.
    #[error(transparent)]
    Target(#[from] ValidationError),
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::domain::streaming::CandleInterval;

    fn load(vars: &[(&str, &str)]) -> Result<ClientSettings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ClientSettings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn replay_strategy_parsing() {
        assert_eq!(
            ReplayStrategy::from_str_case_insensitive("BATCHED"),
            ReplayStrategy::Batched
        );
        assert_eq!(
            ReplayStrategy::from_str_case_insensitive("per-entry"),
            ReplayStrategy::PerEntry
        );
        assert_eq!(
            ReplayStrategy::from_str_case_insensitive("unknown"),
            ReplayStrategy::PerEntry
        );
    }

    #[test]
    fn websocket_settings_defaults() {
        let settings = WebSocketSettings::default();
        assert_eq!(settings.send_timeout, Duration::from_secs(10));
        assert_eq!(settings.reconnect_delay_initial, Duration::from_secs(1));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(30));
        assert!((settings.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(settings.max_reconnect_attempts, 0);
        assert_eq!(settings.max_reconnect_elapsed, None);
    }

    #[test]
    fn token_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingEnvVar(_))));
        assert!(matches!(
            load(&[("DATASERVICES_TOKEN", "   ")]),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let settings = load(&[("DATASERVICES_TOKEN", "abc")]).unwrap();
        assert_eq!(settings.target.kind(), StreamKind::Trades);
        assert_eq!(
            settings.target.url(),
            format!("{DEFAULT_BASE_URL}v2/marketdata/trade/stocks")
        );
        assert!(settings.instruments.is_empty());
        assert_eq!(settings.replay, ReplayStrategy::PerEntry);
        assert_eq!(settings.metrics_port, None);
    }

    #[test]
    fn full_config() {
        let settings = load(&[
            ("DATASERVICES_TOKEN", "abc"),
            ("DATASERVICES_STREAM_KIND", "candles-1M"),
            ("DATASERVICES_MARKET_SEGMENT", "derivatives"),
            ("DATASERVICES_INSTRUMENTS", "WINZ24, WDOZ24,,"),
            ("DATASERVICES_BASE_URL", "ws://localhost:9000"),
            ("DATASERVICES_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("DATASERVICES_SEND_TIMEOUT_SECS", "3"),
            ("DATASERVICES_MAX_RECONNECT_ATTEMPTS", "5"),
            ("DATASERVICES_MAX_RECONNECT_ELAPSED_SECS", "300"),
            ("DATASERVICES_REPLAY", "batched"),
            ("DATASERVICES_METRICS_PORT", "9464"),
        ])
        .unwrap();

        assert_eq!(
            settings.target.kind(),
            StreamKind::Candles(CandleInterval::OneMinute)
        );
        assert_eq!(
            settings.target.url(),
            "ws://localhost:9000/v1/marketdata/candles/1M/derivatives"
        );
        assert_eq!(settings.instruments, ["WINZ24", "WDOZ24"]);
        assert_eq!(
            settings.websocket.reconnect_delay_initial,
            Duration::from_millis(250)
        );
        assert_eq!(settings.websocket.send_timeout, Duration::from_secs(3));
        assert_eq!(settings.websocket.max_reconnect_attempts, 5);
        assert_eq!(
            settings.websocket.max_reconnect_elapsed,
            Some(Duration::from_secs(300))
        );
        assert_eq!(settings.replay, ReplayStrategy::Batched);
        assert_eq!(settings.metrics_port, Some(9464));
    }

    #[test]
    fn unknown_stream_kind_rejected() {
        let result = load(&[
            ("DATASERVICES_TOKEN", "abc"),
            ("DATASERVICES_STREAM_KIND", "stoploss"),
        ]);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn misspelled_variant_rejected() {
        let result = load(&[
            ("DATASERVICES_TOKEN", "abc"),
            ("DATASERVICES_STREAM_VARIANT", "dealyed"),
        ]);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key, .. }) if key == "DATASERVICES_STREAM_VARIANT"
        ));
    }

    #[test]
    fn unknown_exchange_rejected() {
        let result = load(&[
            ("DATASERVICES_TOKEN", "abc"),
            ("DATASERVICES_EXCHANGE", "nyse"),
        ]);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key, .. }) if key == "DATASERVICES_EXCHANGE"
        ));
    }

    #[test]
    fn explicit_variant_and_exchange() {
        let settings = load(&[
            ("DATASERVICES_TOKEN", "abc"),
            ("DATASERVICES_STREAM_VARIANT", "Delayed"),
            ("DATASERVICES_EXCHANGE", "B3"),
        ])
        .unwrap();
        assert_eq!(settings.target.variant(), StreamVariant::Delayed);
        assert_eq!(settings.target.exchange(), Exchange::B3);
    }

    #[test]
    fn unsupported_target_rejected() {
        let result = load(&[
            ("DATASERVICES_TOKEN", "abc"),
            ("DATASERVICES_STREAM_KIND", "books"),
            ("DATASERVICES_STREAM_VARIANT", "delayed"),
        ]);
        assert!(matches!(
            result,
            Err(ConfigError::Target(ValidationError::UnsupportedTarget { .. }))
        ));
    }

    #[test]
    fn malformed_numbers_fall_back_to_defaults() {
        let settings = load(&[
            ("DATASERVICES_TOKEN", "abc"),
            ("DATASERVICES_HEARTBEAT_INTERVAL_SECS", "soon"),
            ("DATASERVICES_RECONNECT_MULTIPLIER", "x"),
        ])
        .unwrap();
        assert_eq!(
            settings.websocket.heartbeat_interval,
            WebSocketSettings::default().heartbeat_interval
        );
        assert!((settings.websocket.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
    }
}
