//! Market Data Streaming Types
//!
//! Core domain types describing which feed a client connects to: stream
//! kind, delivery variant, exchange and market segment. A [`ConnectionTarget`]
//! is immutable once built and resolves to exactly one endpoint URL.

use std::fmt;

use super::validation::ValidationError;

/// Default base URL for the streaming endpoints.
pub const DEFAULT_BASE_URL: &str = "wss://dataservices.btgpactualsolutions.com/stream/";

// =============================================================================
// Stream Kind
// =============================================================================

/// Candle aggregation interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandleInterval {
    /// One second candles.
    OneSecond,
    /// One minute candles.
    OneMinute,
}

impl CandleInterval {
    /// Path token used by the endpoint.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneSecond => "1S",
            Self::OneMinute => "1M",
        }
    }
}

/// Country served by a high frequency news stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Country {
    /// Brazilian news.
    #[default]
    Brazil,
    /// Chilean news.
    Chile,
}

impl Country {
    /// Lowercase country name used by the endpoint.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Brazil => "brazil",
            Self::Chile => "chile",
        }
    }
}

/// Category of real-time data carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamKind {
    /// Trade prints.
    #[default]
    Trades,
    /// Trade prints after vendor processing.
    ProcessedTrades,
    /// Order book snapshots.
    Books,
    /// Index values.
    Indices,
    /// Security list updates.
    Securities,
    /// Candle aggregates.
    Candles(CandleInterval),
    /// Instrument trading status changes.
    InstrumentStatus,
    /// High frequency news.
    News(Country),
}

impl StreamKind {
    /// Parse a stream kind from its configuration name.
    ///
    /// Accepted names mirror the vendor's data types: `trades`,
    /// `processed-trades`, `books`, `indices`, `securities`, `candles-1S`,
    /// `candles-1M`, `instrument_status`, `news-brazil`, `news-chile`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s.trim().to_lowercase().as_str() {
            "trades" => Self::Trades,
            "processed-trades" => Self::ProcessedTrades,
            "books" => Self::Books,
            "indices" => Self::Indices,
            "securities" => Self::Securities,
            "candles-1s" => Self::Candles(CandleInterval::OneSecond),
            "candles-1m" => Self::Candles(CandleInterval::OneMinute),
            "instrument_status" | "status" => Self::InstrumentStatus,
            "news" | "news-brazil" => Self::News(Country::Brazil),
            "news-chile" => Self::News(Country::Chile),
            _ => return None,
        };
        Some(kind)
    }

    /// Whether instruments can be subscribed on this stream.
    #[must_use]
    pub const fn supports_subscriptions(&self) -> bool {
        !matches!(self, Self::News(_))
    }

    /// Whether this is a news stream.
    #[must_use]
    pub const fn is_news(&self) -> bool {
        matches!(self, Self::News(_))
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Trades => "trades",
            Self::ProcessedTrades => "processed-trades",
            Self::Books => "books",
            Self::Indices => "indices",
            Self::Securities => "securities",
            Self::Candles(CandleInterval::OneSecond) => "candles-1S",
            Self::Candles(CandleInterval::OneMinute) => "candles-1M",
            Self::InstrumentStatus => "instrument_status",
            Self::News(_) => "news",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::News(country) => write!(f, "news-{}", country.as_str()),
            other => f.write_str(other.label()),
        }
    }
}

// =============================================================================
// Variant / Exchange / Segment
// =============================================================================

/// Delivery mode modifier for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamVariant {
    /// Real-time delivery.
    #[default]
    Realtime,
    /// Delayed delivery.
    Delayed,
    /// Rate-limited delivery.
    Throttle,
}

impl StreamVariant {
    /// Parse a variant name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "realtime" => Some(Self::Realtime),
            "delayed" => Some(Self::Delayed),
            "throttle" => Some(Self::Throttle),
            _ => None,
        }
    }

    /// Variant name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Delayed => "delayed",
            Self::Throttle => "throttle",
        }
    }
}

/// Exchange whose data is streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Exchange {
    /// B3 (Brasil, Bolsa, Balcão).
    #[default]
    B3,
    /// Bolsa Mexicana de Valores.
    Bmv,
}

impl Exchange {
    /// Parse an exchange name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "b3" => Some(Self::B3),
            "bmv" => Some(Self::Bmv),
            _ => None,
        }
    }

    /// Exchange name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::B3 => "b3",
            Self::Bmv => "bmv",
        }
    }
}

/// Market segment within an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketSegment {
    /// Cash equities.
    Stocks,
    /// Listed options.
    Options,
    /// Futures and other derivatives.
    Derivatives,
    /// Whole exchange.
    All,
}

impl MarketSegment {
    /// Parse a segment name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "stocks" => Some(Self::Stocks),
            "options" => Some(Self::Options),
            "derivatives" => Some(Self::Derivatives),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    /// Segment name used by the endpoint.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stocks => "stocks",
            Self::Options => "options",
            Self::Derivatives => "derivatives",
            Self::All => "all",
        }
    }

    /// Segment used when none is configured.
    #[must_use]
    pub const fn default_for(exchange: Exchange, kind: StreamKind) -> Self {
        match (exchange, kind) {
            (Exchange::B3, StreamKind::Indices) => Self::All,
            (Exchange::B3, _) => Self::Stocks,
            (Exchange::Bmv, _) => Self::All,
        }
    }
}

// =============================================================================
// Connection Target
// =============================================================================

/// Immutable description of the feed a client connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    kind: StreamKind,
    variant: StreamVariant,
    exchange: Exchange,
    segment: MarketSegment,
    url: String,
}

impl ConnectionTarget {
    /// Resolve a target against the default base URL.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnsupportedTarget` when the vendor offers no
    /// stream for the combination.
    pub fn new(
        kind: StreamKind,
        variant: StreamVariant,
        exchange: Exchange,
        segment: Option<MarketSegment>,
    ) -> Result<Self, ValidationError> {
        Self::with_base_url(DEFAULT_BASE_URL, kind, variant, exchange, segment)
    }

    /// Resolve a target against a custom base URL.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnsupportedTarget` when the vendor offers no
    /// stream for the combination.
    pub fn with_base_url(
        base_url: &str,
        kind: StreamKind,
        variant: StreamVariant,
        exchange: Exchange,
        segment: Option<MarketSegment>,
    ) -> Result<Self, ValidationError> {
        let segment = segment.unwrap_or_else(|| MarketSegment::default_for(exchange, kind));
        let path = endpoint_path(kind, variant, exchange, segment).ok_or_else(|| {
            ValidationError::UnsupportedTarget {
                kind: kind.to_string(),
                variant: variant.as_str(),
                exchange: exchange.as_str(),
                segment: segment.as_str(),
            }
        })?;

        let base = base_url.trim_end_matches('/');
        Ok(Self {
            kind,
            variant,
            exchange,
            segment,
            url: format!("{base}/{path}"),
        })
    }

    /// Stream kind carried by the connection.
    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Delivery variant.
    #[must_use]
    pub const fn variant(&self) -> StreamVariant {
        self.variant
    }

    /// Exchange.
    #[must_use]
    pub const fn exchange(&self) -> Exchange {
        self.exchange
    }

    /// Market segment.
    #[must_use]
    pub const fn segment(&self) -> MarketSegment {
        self.segment
    }

    /// Resolved endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

fn endpoint_path(
    kind: StreamKind,
    variant: StreamVariant,
    exchange: Exchange,
    segment: MarketSegment,
) -> Option<String> {
    use MarketSegment::{All, Derivatives, Options, Stocks};
    use StreamVariant::{Delayed, Realtime, Throttle};

    if let StreamKind::News(country) = kind {
        return (variant == Realtime).then(|| format!("v2/hfn/{}", country.as_str()));
    }

    let seg = segment.as_str();
    let path = match (exchange, kind, variant, segment) {
        (Exchange::Bmv, StreamKind::Trades, Realtime, All) => "v1/marketdata/bmv/trades".to_string(),
        (Exchange::Bmv, ..) => return None,

        (_, _, _, All) if kind != StreamKind::Indices => return None,
        (_, StreamKind::Indices, Realtime, All) => "v2/marketdata/indices".to_string(),
        (_, StreamKind::Indices, Delayed, All) => "v2/marketdata/indices/delayed".to_string(),

        (_, StreamKind::Trades, Realtime, _) => format!("v2/marketdata/trade/{seg}"),
        (_, StreamKind::Trades, Delayed, _) => format!("v2/marketdata/trade/{seg}/delayed"),
        (_, StreamKind::Trades, Throttle, _) => format!("v2/marketdata/throttle/trade/{seg}"),
        (_, StreamKind::ProcessedTrades, Realtime, _) => {
            format!("v2/marketdata/processed/trade/{seg}")
        }
        (_, StreamKind::Books, Realtime, _) => format!("v2/marketdata/book/{seg}"),
        (_, StreamKind::Books, Throttle, _) => format!("v2/marketdata/throttle/book/{seg}"),
        (_, StreamKind::Securities, Realtime, _) => format!("v1/marketdata/sec_list/{seg}"),
        (_, StreamKind::Candles(interval), Realtime, Stocks | Derivatives) => {
            format!("v1/marketdata/candles/{}/{seg}", interval.as_str())
        }
        (_, StreamKind::InstrumentStatus, Realtime, Stocks | Options | Derivatives) => {
            format!("v2/marketdata/instrument_status/{seg}")
        }
        _ => return None,
    };

    Some(path)
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of a streaming client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not started yet.
    #[default]
    Disconnected,
    /// Initial connection in progress.
    Connecting,
    /// Connected with the registry fully replayed.
    Connected,
    /// Connection lost, backing off between attempts.
    Reconnecting,
    /// New session open, replaying subscriptions.
    Replaying,
    /// Terminated; no further delivery.
    Closed,
}

impl ConnectionState {
    /// Whether control frames may be sent right away.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the client reached its terminal state.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
