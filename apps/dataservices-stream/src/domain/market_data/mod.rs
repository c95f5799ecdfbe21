//! Market Data Messages
//!
//! Decoded units of data handed to the caller's message handler. Payloads
//! map the vendor's JSON fields (`symb`, `px`, `qty`, ...) onto named Rust
//! fields; fields the client does not model are kept in `extra` so nothing
//! the feed sends is lost.
//!
//! # Wire Format (JSON)
//! ```json
//! {"ev": "trade", "symb": "PETR4", "px": 38.50, "qty": 100}
//! {"ev": "book", "symb": "VALE3", "bid": [{"px": 61.2, "qty": 300}], "offer": [...]}
//! {"ev": "available_to_subscribe", "message": ["PETR4", "VALE3"]}
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::subscription::Symbol;

// =============================================================================
// Data Payloads
// =============================================================================

/// A trade print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeMessage {
    /// Instrument symbol.
    #[serde(rename = "symb")]
    pub symbol: Symbol,

    /// Trade price.
    #[serde(rename = "px")]
    pub price: Decimal,

    /// Traded quantity.
    #[serde(rename = "qty", default)]
    pub quantity: Option<Decimal>,

    /// Fields not modeled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One price level of an order book side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    /// Level price.
    #[serde(rename = "px")]
    pub price: Decimal,

    /// Aggregated quantity at the level.
    #[serde(rename = "qty", default)]
    pub quantity: Option<Decimal>,

    /// Fields not modeled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An order book snapshot, best level first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookMessage {
    /// Instrument symbol.
    #[serde(rename = "symb")]
    pub symbol: Symbol,

    /// Bid side.
    #[serde(rename = "bid", default)]
    pub bids: Vec<BookLevel>,

    /// Offer side.
    #[serde(rename = "offer", default)]
    pub offers: Vec<BookLevel>,

    /// Fields not modeled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BookMessage {
    /// Best bid level.
    #[must_use]
    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    /// Best offer level.
    #[must_use]
    pub fn best_offer(&self) -> Option<&BookLevel> {
        self.offers.first()
    }
}

/// A candle aggregate (partial or closed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleMessage {
    /// Instrument symbol.
    #[serde(rename = "symb")]
    pub symbol: Symbol,

    /// Open price.
    #[serde(alias = "o", default)]
    pub open: Option<Decimal>,

    /// High price.
    #[serde(alias = "h", default)]
    pub high: Option<Decimal>,

    /// Low price.
    #[serde(alias = "l", default)]
    pub low: Option<Decimal>,

    /// Close (last) price.
    #[serde(alias = "c", default)]
    pub close: Option<Decimal>,

    /// Traded volume.
    #[serde(alias = "v", default)]
    pub volume: Option<Decimal>,

    /// Fields not modeled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An instrument trading status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Instrument symbol.
    #[serde(rename = "symb")]
    pub symbol: Symbol,

    /// Trading status (e.g. open, auction, halted).
    #[serde(alias = "st", default)]
    pub status: Option<String>,

    /// Fields not modeled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A high frequency news item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsMessage {
    /// Headline.
    #[serde(alias = "headline", default)]
    pub title: Option<String>,

    /// Body text.
    #[serde(alias = "content", default)]
    pub body: Option<String>,

    /// Fields not modeled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// =============================================================================
// Errors and Termination
// =============================================================================

/// A frame that could not be decoded.
///
/// Delivered to the handler in place of the frame; the stream continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not decode frame: {reason}")]
pub struct ProtocolDecodeError {
    /// Decoder failure description.
    pub reason: String,
    /// Raw frame text.
    pub raw: String,
}

/// Why a client stopped delivering for good.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TerminationReason {
    /// Reconnection attempts exhausted.
    #[error("reconnection gave up after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// The credential was rejected while reconnecting.
    #[error("credential rejected: {0}")]
    AuthRejected(String),
    /// A non-retryable connection failure, such as an invalid endpoint.
    #[error("unrecoverable connection failure: {0}")]
    Unrecoverable(String),
}

// =============================================================================
// Inbound Message
// =============================================================================

/// A decoded unit of data delivered to the message handler.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Trade print.
    Trade(TradeMessage),
    /// Order book update.
    Book(BookMessage),
    /// Candle tick.
    Candle(CandleMessage),
    /// Instrument status change.
    InstrumentStatus(StatusMessage),
    /// News item.
    News(NewsMessage),
    /// Reply to `available_to_subscribe`.
    AvailableToSubscribe(Vec<Symbol>),
    /// Reply to `subscribed_to`.
    SubscribedTo(Vec<Symbol>),
    /// Reply to `get_last_event`; `None` when the instrument has no event yet.
    LastEvent(Option<Value>),
    /// Informational server notice (acknowledgments and similar).
    Notice(Value),
    /// Server-reported error for a control frame.
    ServerError(String),
    /// Well-formed frame with an event tag this client does not model.
    Other {
        /// Event tag.
        event: String,
        /// Full frame.
        payload: Value,
    },
    /// Malformed frame; the stream continues.
    DecodeError(ProtocolDecodeError),
    /// Final message: the client is closed.
    Terminated(TerminationReason),
}

impl InboundMessage {
    /// Short tag for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Trade(_) => "trade",
            Self::Book(_) => "book",
            Self::Candle(_) => "candle",
            Self::InstrumentStatus(_) => "instrument_status",
            Self::News(_) => "news",
            Self::AvailableToSubscribe(_) => "available_to_subscribe",
            Self::SubscribedTo(_) => "subscribed_to",
            Self::LastEvent(_) => "get_last_event",
            Self::Notice(_) => "message",
            Self::ServerError(_) => "error",
            Self::Other { .. } => "other",
            Self::DecodeError(_) => "decode_error",
            Self::Terminated(_) => "terminated",
        }
    }

    /// Instrument symbol for market data payloads.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Trade(m) => Some(&m.symbol),
            Self::Book(m) => Some(&m.symbol),
            Self::Candle(m) => Some(&m.symbol),
            Self::InstrumentStatus(m) => Some(&m.symbol),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_keeps_unmodeled_fields() {
        let json = r#"{"symb":"PETR4","px":38.50,"qty":100,"buyer":"3"}"#;
        let trade: TradeMessage = serde_json::from_str(json).unwrap();
        assert_eq!(trade.symbol, "PETR4");
        assert_eq!(trade.price, Decimal::new(3850, 2));
        assert_eq!(trade.quantity, Some(Decimal::from(100)));
        assert_eq!(trade.extra.get("buyer"), Some(&Value::from("3")));
    }

    #[test]
    fn book_best_levels() {
        let json = r#"{"symb":"VALE3","bid":[{"px":61.2,"qty":300},{"px":61.1}],"offer":[{"px":61.3}]}"#;
        let book: BookMessage = serde_json::from_str(json).unwrap();
        assert_eq!(book.best_bid().unwrap().price, Decimal::new(612, 1));
        assert_eq!(book.best_offer().unwrap().price, Decimal::new(613, 1));
        assert_eq!(book.bids.len(), 2);
    }

    #[test]
    fn candle_accepts_short_field_names() {
        let json = r#"{"symb":"WINZ24","o":1,"h":3,"l":0.5,"c":2}"#;
        let candle: CandleMessage = serde_json::from_str(json).unwrap();
        assert_eq!(candle.high, Some(Decimal::from(3)));
        assert_eq!(candle.volume, None);
    }

    #[test]
    fn labels_and_symbols() {
        let msg = InboundMessage::SubscribedTo(vec!["PETR4".into()]);
        assert_eq!(msg.label(), "subscribed_to");
        assert_eq!(msg.symbol(), None);

        let status: StatusMessage = serde_json::from_str(r#"{"symb":"PETR4","st":"halted"}"#).unwrap();
        assert_eq!(status.status.as_deref(), Some("halted"));
        assert_eq!(InboundMessage::InstrumentStatus(status).symbol(), Some("PETR4"));
    }
}
