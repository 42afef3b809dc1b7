//! Exponential backoff for message-bus reconnects.
//!
//! After a broker connection drops, the MQTT service waits
//! [`ReconnectState::current_delay`] before each attempt. Every failed
//! attempt multiplies the delay (1s, 2s, 4s, ... capped at 32s); a
//! successful connect resets it.

use std::time::Duration;

/// Configuration for reconnect backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt after a drop.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Multiplier applied after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            multiplier: 2.0,
        }
    }
}

/// Backoff state for one connection.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    current_delay: Duration,
    consecutive_failures: u32,
}

impl ReconnectState {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            config,
            consecutive_failures: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ReconnectConfig::default())
    }

    /// Record a failed attempt and advance the backoff.
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        let next = self.current_delay.as_secs_f64() * self.config.multiplier;
        self.current_delay = Duration::from_secs_f64(next).min(self.config.max_delay);
    }

    /// Record a successful connect and reset the backoff.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.current_delay = self.config.initial_delay;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay to wait before the next attempt.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}
