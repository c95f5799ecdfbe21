//! Application Layer - Port definitions.
//!
//! This layer contains the port interfaces that define how the streaming
//! session interacts with the network and with the caller.

/// Port interfaces for external systems (transport, connector, handler).
pub mod ports;
