//! Configuration Module
//!
//! Configuration loading for the streaming client and the tail binary.

mod settings;

pub use settings::{ClientSettings, ConfigError, ReplayStrategy, WebSocketSettings};
