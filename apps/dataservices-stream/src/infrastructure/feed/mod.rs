//! Data Services WebSocket Adapters
//!
//! Implements the streaming client for Data Services market data and news
//! feeds:
//!
//! - **Transport**: Authenticated WebSocket sessions with heartbeat
//! - **Codec**: JSON frames tagged by `ev`
//! - **Session**: Replay and reconnection controller
//! - **Dispatch**: Decode-and-deliver loop
//! - **Client**: Public facade

pub mod auth;
pub mod client;
pub mod codec;
pub mod dispatch;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod session;
pub mod transport;

pub use auth::{AuthError, Credential};
pub use client::{ClientError, ExecutionMode, StreamClient, StreamClientConfig};
pub use codec::{CodecError, JsonCodec};
pub use heartbeat::{HeartbeatConfig, HeartbeatError, HeartbeatEvent, HeartbeatMonitor};
pub use messages::{ControlAction, ControlFrame, ControlParams};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use transport::{WsConnector, WsTransport};
