//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the feed target description, connection state,
//! decoded market data messages and the subscription registry. Nothing here
//! touches the network.

/// Decoded market data messages.
pub mod market_data;
/// Feed targets, stream kinds and connection state.
pub mod streaming;
/// Subscription registry and validated requests.
pub mod subscription;
/// Validation errors.
pub mod validation;
