//! Pure connection state, session identity and backoff policy
//!
//! Nothing in this module performs I/O; the impure coordination lives in
//! [`super::client`].

use crate::config::ReconnectConfig;
use serde::Serialize;
use std::time::Duration;

/// Lifecycle state of the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "attempt", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no reconnect pending
    Disconnected,
    /// Caller-initiated dial and handshake in progress
    Connecting,
    /// Session established, dispatch loop running
    Connected,
    /// Caller-initiated teardown in progress
    Disconnecting,
    /// Recovering from an unrequested teardown (attempt number)
    Reconnecting(u32),
}

/// Identity the client presents to the broker on every connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub client_id: String,
    pub clean_session: bool,
}

impl Session {
    pub fn new(client_id: impl Into<String>, clean_session: bool) -> Self {
        Self {
            client_id: client_id.into(),
            clean_session,
        }
    }
}

/// Decides how long to wait before each reconnect attempt
pub trait BackoffPolicy: Send + Sync {
    /// Delay before attempt number `attempt` (1-based)
    fn delay(&self, attempt: u32) -> Duration;

    /// Maximum number of attempts (None = unlimited)
    fn max_attempts(&self) -> Option<u32> {
        None
    }
}

/// Doubling delay starting at `min`, capped at `max`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub min: Duration,
    pub max: Duration,
    pub max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

impl From<&ReconnectConfig> for ExponentialBackoff {
    fn from(config: &ReconnectConfig) -> Self {
        ExponentialBackoff::new(
            Duration::from_millis(config.min_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
        .with_max_attempts(config.max_attempts)
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        // 2^31 already dwarfs any sane max, so clamp the shift.
        let shift = attempt.saturating_sub(1).min(31);
        self.min
            .checked_mul(1u32 << shift)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

/// Same delay for every attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedBackoff {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl BackoffPolicy for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }

    fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}
