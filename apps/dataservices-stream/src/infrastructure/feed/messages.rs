//! Data Services Control Frames
//!
//! Wire format types for the JSON control frames a client sends on an open
//! stream. Inbound payload types live in [`crate::domain::market_data`].
//!
//! # Control Frames
//!
//! ```json
//! {"action": "subscribe", "params": ["PETR4", "VALE3"]}
//! {"action": "subscribe", "params": {"tickers": ["PETR4"], "n": 5}}
//! {"action": "subscribe", "params": ["PETR4"], "type": "partial"}
//! {"action": "get_last_event", "params": "PETR4"}
//! {"action": "available_to_subscribe"}
//! ```

use serde::Serialize;

use crate::domain::subscription::{SubscriptionEntry, SubscriptionRequest, Symbol};

// =============================================================================
// Control Frame
// =============================================================================

/// Action carried by a control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    /// Add instruments to the session.
    Subscribe,
    /// Remove instruments from the session.
    Unsubscribe,
    /// List instruments the stream offers.
    AvailableToSubscribe,
    /// List instruments the session holds.
    SubscribedTo,
    /// Last event for one instrument.
    GetLastEvent,
    /// Trading status for instruments.
    InstrumentStatus,
    /// Most recent news items (news streams only).
    LatestNews,
}

impl ControlAction {
    /// Wire name, used for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::AvailableToSubscribe => "available_to_subscribe",
            Self::SubscribedTo => "subscribed_to",
            Self::GetLastEvent => "get_last_event",
            Self::InstrumentStatus => "instrument_status",
            Self::LatestNews => "latest_news",
        }
    }
}

/// `params` member of a control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ControlParams {
    /// Plain instrument list.
    Tickers(Vec<Symbol>),
    /// Instrument list with a book depth.
    Book {
        /// Instruments.
        tickers: Vec<Symbol>,
        /// Maximum book level.
        n: u8,
    },
    /// Single instrument.
    Ticker(Symbol),
}

/// A JSON control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlFrame {
    /// Requested action.
    pub action: ControlAction,

    /// Action arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<ControlParams>,

    /// Candle type selector (candle streams only).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub candle_type: Option<&'static str>,
}

impl ControlFrame {
    const fn bare(action: ControlAction) -> Self {
        Self {
            action,
            params: None,
            candle_type: None,
        }
    }

    /// Subscribe frame for a validated request.
    #[must_use]
    pub fn subscribe(request: &SubscriptionRequest) -> Self {
        let options = request.options();
        Self::subscription(
            ControlAction::Subscribe,
            request.symbols().to_vec(),
            options.depth,
            options.candle_type.map(|t| t.as_str()),
        )
    }

    /// Unsubscribe frame for a validated request.
    ///
    /// Book depth is not part of an unsubscribe.
    #[must_use]
    pub fn unsubscribe(request: &SubscriptionRequest) -> Self {
        Self::subscription(
            ControlAction::Unsubscribe,
            request.symbols().to_vec(),
            None,
            request.options().candle_type.map(|t| t.as_str()),
        )
    }

    fn subscription(
        action: ControlAction,
        tickers: Vec<Symbol>,
        depth: Option<u8>,
        candle_type: Option<&'static str>,
    ) -> Self {
        let params = match depth {
            Some(n) => ControlParams::Book { tickers, n },
            None => ControlParams::Tickers(tickers),
        };
        Self {
            action,
            params: Some(params),
            candle_type,
        }
    }

    /// Subscribe frame restoring one registry entry.
    #[must_use]
    pub fn replay_entry(entry: &SubscriptionEntry) -> Self {
        Self::subscription(
            ControlAction::Subscribe,
            vec![entry.key.symbol.clone()],
            entry.params.depth,
            entry.key.candle_type.map(|t| t.as_str()),
        )
    }

    /// Subscribe frames restoring a registry snapshot, coalescing runs of
    /// consecutive entries that share stream kind and parameters.
    #[must_use]
    pub fn replay_batched(entries: &[SubscriptionEntry]) -> Vec<Self> {
        let mut frames = Vec::new();
        let mut run: Vec<Symbol> = Vec::new();
        let mut current: Option<&SubscriptionEntry> = None;

        for entry in entries {
            let same_group = current.is_some_and(|head| {
                head.key.kind == entry.key.kind
                    && head.key.candle_type == entry.key.candle_type
                    && head.params == entry.params
            });
            if !same_group {
                if let Some(head) = current {
                    frames.push(Self::batch_frame(head, std::mem::take(&mut run)));
                }
                current = Some(entry);
            }
            run.push(entry.key.symbol.clone());
        }

        if let Some(head) = current {
            frames.push(Self::batch_frame(head, run));
        }
        frames
    }

    fn batch_frame(head: &SubscriptionEntry, tickers: Vec<Symbol>) -> Self {
        Self::subscription(
            ControlAction::Subscribe,
            tickers,
            head.params.depth,
            head.key.candle_type.map(|t| t.as_str()),
        )
    }

    /// `available_to_subscribe` query.
    #[must_use]
    pub const fn available_to_subscribe() -> Self {
        Self::bare(ControlAction::AvailableToSubscribe)
    }

    /// `subscribed_to` query.
    #[must_use]
    pub const fn subscribed_to() -> Self {
        Self::bare(ControlAction::SubscribedTo)
    }

    /// `latest_news` query.
    #[must_use]
    pub const fn latest_news() -> Self {
        Self::bare(ControlAction::LatestNews)
    }

    /// `get_last_event` query for one instrument.
    #[must_use]
    pub fn get_last_event(ticker: impl Into<Symbol>) -> Self {
        Self {
            action: ControlAction::GetLastEvent,
            params: Some(ControlParams::Ticker(ticker.into())),
            candle_type: None,
        }
    }

    /// `instrument_status` query.
    #[must_use]
    pub fn instrument_status(tickers: Vec<Symbol>) -> Self {
        Self {
            action: ControlAction::InstrumentStatus,
            params: Some(ControlParams::Tickers(tickers)),
            candle_type: None,
        }
    }
}
