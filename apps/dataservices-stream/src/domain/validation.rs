//! Validation errors for targets and subscription requests.
//!
//! Validation always happens before any registry mutation or wire traffic,
//! so a rejected call has no side effects.

/// Rejected configuration or subscribe/unsubscribe arguments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The vendor offers no stream for this combination.
    #[error(
        "no stream available for kind={kind}, variant={variant}, exchange={exchange}, segment={segment}"
    )]
    UnsupportedTarget {
        /// Requested stream kind.
        kind: String,
        /// Requested variant.
        variant: &'static str,
        /// Requested exchange.
        exchange: &'static str,
        /// Requested segment.
        segment: &'static str,
    },

    /// No instruments were given.
    #[error("instrument list cannot be empty")]
    EmptyInstrumentList,

    /// An instrument symbol is blank.
    #[error("instrument at position {0} is blank")]
    BlankSymbol(usize),

    /// The stream kind does not accept this action.
    #[error("{action} is not supported on {kind} streams")]
    UnsupportedAction {
        /// Stream kind of the client.
        kind: String,
        /// Rejected action.
        action: &'static str,
    },

    /// Book depth given for a non-book stream.
    #[error("book depth is only valid on books streams, not {0}")]
    DepthNotAllowed(String),

    /// Book depth outside 1..=10.
    #[error("book depth must be between 1 and 10, got {0}")]
    DepthOutOfRange(u8),

    /// Candle type given for a non-candle stream.
    #[error("candle type is only valid on candle streams, not {0}")]
    CandleTypeNotAllowed(String),
}
