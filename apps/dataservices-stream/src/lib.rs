#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Data Services Stream - Real-time Market Data Client
//!
//! A WebSocket client for the Data Services real-time feeds (books, trades,
//! candles, instrument status, news). One client owns one connection, keeps
//! a registry of its subscriptions and replays it whenever the connection is
//! re-established, so the caller's handler only ever sees a gap, never a
//! crash.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core streaming logic and data types
//!   - `streaming`: Connection targets, stream kinds, connection state
//!   - `subscription`: Subscription registry and validated requests
//!   - `market_data`: Decoded inbound messages
//!
//! - **Application**: Port definitions
//!   - `ports`: Connector/transport and message handler interfaces
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: WebSocket transport, codec, reconnection, dispatch, client
//!   - `config`: Environment configuration
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!                 subscribe / queries            ┌──────────────┐
//!   caller ─────────────────────────────────────►│  Registry    │
//!     │                                          └──────┬───────┘
//!     │ run(handler)                                    │ replay
//!     ▼                                                 ▼
//! ┌──────────┐  frames   ┌──────────┐  decode  ┌─────────────────┐
//! │ Data WS  │──────────►│ Dispatch │─────────►│ MessageHandler  │
//! └──────────┘           └──────────┘          └─────────────────┘
//!      ▲                      │ loss
//!      └──── Reconnection ◄───┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market_data::{
    BookLevel, BookMessage, CandleMessage, InboundMessage, NewsMessage, ProtocolDecodeError,
    StatusMessage, TerminationReason, TradeMessage,
};
pub use domain::streaming::{
    CandleInterval, ConnectionState, ConnectionTarget, Country, Exchange, MarketSegment,
    StreamKind, StreamVariant,
};
pub use domain::subscription::{
    CandleType, SubscribeOptions, SubscriptionEntry, SubscriptionKey, SubscriptionRegistry,
    SubscriptionRequest, Symbol,
};
pub use domain::validation::ValidationError;

// Ports
pub use application::ports::{
    ConnectError, Connector, MessageHandler, ReceiveError, SendError, Transport,
};

// Client
pub use infrastructure::feed::{
    ClientError, Credential, ExecutionMode, StreamClient, StreamClientConfig,
};

// Infrastructure config
pub use infrastructure::config::{ClientSettings, ConfigError, ReplayStrategy, WebSocketSettings};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
