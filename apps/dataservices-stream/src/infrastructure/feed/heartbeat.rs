//! Heartbeat Monitor
//!
//! Watches stream liveness with WebSocket pings. The monitor lives inside the
//! read half of one session and is polled from the same `select!` that reads
//! frames, so it needs no task or channel of its own:
//!
//! ```text
//! idle ──(interval tick)──► SendPing ──► awaiting pong
//!   ▲                                        │
//!   └──────(any inbound frame)───────────────┤
//!                                            └──(deadline passes)──► Timeout
//! ```
//!
//! Any inbound frame counts as proof of life, not only pongs; a busy book
//! stream never times out while data flows.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::infrastructure::config::WebSocketSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// How long to wait for any frame after a ping.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &WebSocketSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            pong_timeout: settings.heartbeat_timeout,
        }
    }
}

/// What the session should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Write a ping and call [`HeartbeatMonitor::ping_sent`].
    SendPing,
    /// Nothing arrived within the pong timeout; the session is dead.
    Timeout,
}

/// Heartbeat failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeartbeatError {
    /// No frame arrived within the pong timeout.
    #[error("heartbeat timeout after {0:?}")]
    Timeout(Duration),
}

/// Per-session liveness tracker.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    ticker: Interval,
    pong_deadline: Option<Instant>,
}

impl HeartbeatMonitor {
    /// Start monitoring. The first ping is due one interval from now.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Self {
            config,
            ticker,
            pong_deadline: None,
        }
    }

    /// Wait for the next heartbeat event.
    ///
    /// Cancel safe: dropping the future loses no state, so it can sit in a
    /// `select!` next to the frame reader.
    pub async fn next_event(&mut self) -> HeartbeatEvent {
        match self.pong_deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                HeartbeatEvent::Timeout
            }
            None => {
                self.ticker.tick().await;
                HeartbeatEvent::SendPing
            }
        }
    }

    /// Start the pong deadline after a ping went out.
    pub fn ping_sent(&mut self) {
        self.pong_deadline = Some(Instant::now() + self.config.pong_timeout);
    }

    /// Record proof of life.
    pub fn frame_received(&mut self) {
        self.pong_deadline = None;
    }

    /// Whether a ping is still unanswered.
    #[must_use]
    pub const fn is_awaiting_pong(&self) -> bool {
        self.pong_deadline.is_some()
    }

    /// The error reported when the deadline passes.
    #[must_use]
    pub const fn timeout_error(&self) -> HeartbeatError {
        HeartbeatError::Timeout(self.config.pong_timeout)
    }
}
