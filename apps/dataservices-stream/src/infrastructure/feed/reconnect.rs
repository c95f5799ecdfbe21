//! Reconnection Policy
//!
//! Capped exponential backoff with jitter for re-opening a lost stream.
//! Attempt `n` (counting from zero) waits `initial * multiplier^n`, capped at
//! `max_delay`, then scaled by a random factor in `1 ± jitter`.
//!
//! A policy is bounded by an attempt count, an elapsed-time budget, both, or
//! neither (a long-running feed retries until closed). The budget refills
//! once a replay succeeds.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::infrastructure::config::WebSocketSettings;

/// Shortest delay ever returned.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt after a loss.
    pub initial_delay: Duration,
    /// Cap on the un-jittered delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts allowed per loss (0 = unlimited).
    pub max_attempts: u32,
    /// Time allowed per loss (`None` = unbounded).
    pub max_elapsed: Option<Duration>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_websocket_settings(&WebSocketSettings::default())
    }
}

impl ReconnectConfig {
    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &WebSocketSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: 0.1,
            max_attempts: settings.max_reconnect_attempts,
            max_elapsed: settings.max_reconnect_elapsed,
        }
    }

    /// Set the jitter fraction.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Bound the number of attempts per loss.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Bound the time spent reconnecting per loss.
    #[must_use]
    pub const fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    /// Un-jittered delay for the zero-based `attempt`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        scale(self.initial_delay, factor).map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let spread = self.jitter_factor.clamp(0.0, 1.0);
        if !spread.is_finite() || spread <= 0.0 {
            return delay.max(MIN_DELAY);
        }

        let factor = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
        scale(delay, factor).unwrap_or(delay).max(MIN_DELAY)
    }
}

/// `duration * factor` in whole nanoseconds; `None` on overflow or NaN.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn scale(duration: Duration, factor: f64) -> Option<Duration> {
    let nanos = (duration.as_nanos() as f64 * factor).round();
    (nanos.is_finite() && nanos >= 0.0 && nanos < u64::MAX as f64)
        .then(|| Duration::from_nanos(nanos as u64))
}

/// Why a policy stopped handing out delays.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// Attempt budget spent.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
    /// Time budget spent.
    #[error("reconnection time budget ({0:?}) exceeded")]
    MaxElapsedExceeded(Duration),
}

/// Backoff state for one connection loss.
///
/// ```rust
/// use dataservices_stream::infrastructure::feed::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default().with_max_attempts(2));
/// assert!(policy.next_delay().is_some());
/// assert!(policy.next_delay().is_some());
/// assert!(policy.next_delay().is_none());
///
/// // A successful replay refills the budget
/// policy.reset();
/// assert!(policy.next_delay().is_some());
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
    started: Option<Instant>,
}

impl ReconnectPolicy {
    /// Create a fresh policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
            started: None,
        }
    }

    /// Delay before the next attempt, or `None` once a budget is spent.
    ///
    /// The elapsed budget starts with the first call after a reset; a delay
    /// that would end past it is refused rather than cut short.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        let started = *self.started.get_or_insert_with(Instant::now);
        if !self.should_retry() {
            return None;
        }

        let delay = self.config.jittered(self.config.base_delay(self.attempt_count));
        if let Some(budget) = self.config.max_elapsed
            && started.elapsed() + delay > budget
        {
            return None;
        }

        self.attempt_count += 1;
        Some(delay)
    }

    /// Refill the budget after a successful replay.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
        self.started = None;
    }

    /// Attempts handed out since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether the attempt budget allows another try.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// The budget that ran out.
    #[must_use]
    pub fn exhausted(&self) -> ReconnectError {
        match self.config.max_elapsed {
            Some(budget) if self.should_retry() => ReconnectError::MaxElapsedExceeded(budget),
            _ => ReconnectError::MaxAttemptsExceeded(self.attempt_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn steady(initial_ms: u64) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0,
            max_elapsed: None,
        }
    }

    #[test]
    fn defaults_follow_websocket_settings() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 0);
        assert_eq!(config.max_elapsed, None);
    }

    #[test]
    fn delays_double_until_capped() {
        let config = ReconnectConfig {
            max_delay: Duration::from_millis(1000),
            ..steady(100)
        };
        let mut policy = ReconnectPolicy::new(config);

        let delays: Vec<u128> = (0..6)
            .map(|_| policy.next_delay().unwrap().as_millis())
            .collect();
        assert_eq!(delays, [100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn huge_attempt_numbers_stay_capped() {
        let config = steady(100);
        assert_eq!(config.base_delay(u32::MAX), config.max_delay);
    }

    #[test]
    fn shrinking_multiplier_is_treated_as_constant() {
        let config = ReconnectConfig {
            multiplier: 0.5,
            ..steady(100)
        };
        assert_eq!(config.base_delay(4), Duration::from_millis(100));
    }

    #[test]
    fn attempt_budget() {
        let mut policy = ReconnectPolicy::new(steady(100).with_max_attempts(3));

        for expected in 1..=3 {
            assert!(policy.next_delay().is_some());
            assert_eq!(policy.attempt_count(), expected);
        }

        assert!(policy.next_delay().is_none());
        assert_eq!(policy.exhausted(), ReconnectError::MaxAttemptsExceeded(3));
    }

    #[test]
    fn elapsed_budget_refuses_overrunning_delay() {
        let mut policy =
            ReconnectPolicy::new(steady(300).with_max_elapsed(Duration::from_millis(500)));

        // 300ms fits, the following 600ms does not
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(300)));
        assert_eq!(policy.next_delay(), None);
        assert_eq!(
            policy.exhausted(),
            ReconnectError::MaxElapsedExceeded(Duration::from_millis(500))
        );
    }

    #[test]
    fn reset_restarts_from_initial_delay() {
        let mut policy = ReconnectPolicy::new(steady(100).with_max_attempts(3));
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn unlimited_attempts_never_give_up() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        assert!((0..1000).all(|_| policy.next_delay().is_some()));
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_in_band(
            initial_ms in 1u64..5_000,
            attempt in 0u32..40,
            jitter in 0.0f64..0.5,
        ) {
            let config = steady(initial_ms).with_jitter(jitter);
            let base = config.base_delay(attempt);
            let delay = config.jittered(base);

            prop_assert!(base <= config.max_delay);
            prop_assert!(delay >= MIN_DELAY);
            prop_assert!(delay.as_secs_f64() <= base.as_secs_f64() * (1.0 + jitter) + 1e-6);
            prop_assert!(delay.as_secs_f64() + 1e-3 >= base.as_secs_f64() * (1.0 - jitter));
        }
    }
}
