//! Pure health monitoring and reconnection logic
//!
//! This module contains pure functions for reconnection decisions, keep-alive
//! scheduling and connection health assessment. The client feeds it clocks
//! and counters; nothing here sleeps or touches the network.

use super::connection::{BackoffPolicy, ConnectionState};
use crate::protocol::ConnectReturnCode;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide whether to make another reconnect attempt (pure function)
    ///
    /// `completed_attempts` is the number of attempts already made in this
    /// recovery cycle. Unlimited when the policy has no attempt cap.
    pub fn should_attempt_reconnection(
        completed_attempts: u32,
        policy: &dyn BackoffPolicy,
        disconnect_requested: bool,
    ) -> ReconnectionDecision {
        if disconnect_requested {
            return ReconnectionDecision::AbortDisconnectRequested;
        }

        if let Some(max_attempts) = policy.max_attempts() {
            if completed_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = completed_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay: policy.delay(attempt),
        }
    }

    /// Whether a refused handshake is worth retrying (pure function)
    ///
    /// Only a temporarily unavailable broker can change its mind; a bad
    /// client id or bad credentials will be refused again.
    pub fn is_retryable_refusal(code: ConnectReturnCode) -> bool {
        code.is_transient()
    }

    /// Next keep-alive step (pure function)
    ///
    /// `last_inbound` is when the broker was last heard from, `last_outbound`
    /// when the client last wrote a packet, `probe_sent` when the outstanding
    /// PINGREQ went out (if any). A probe is due once either direction has
    /// been quiet for a full interval: inbound silence detects a dead broker,
    /// outbound silence would let the broker drop us.
    pub fn keepalive_action(
        last_inbound: Instant,
        last_outbound: Instant,
        probe_sent: Option<Instant>,
        now: Instant,
        keep_alive: Duration,
        grace: Duration,
    ) -> KeepAliveAction {
        match probe_sent {
            // Anything inbound after the probe counts as an answer.
            Some(sent) if last_inbound < sent => {
                let deadline = sent + grace;
                if now >= deadline {
                    KeepAliveAction::Expired
                } else {
                    KeepAliveAction::Wait(deadline - now)
                }
            }
            _ => {
                let due = last_inbound.min(last_outbound) + keep_alive;
                if now >= due {
                    KeepAliveAction::SendProbe
                } else {
                    KeepAliveAction::Wait(due - now)
                }
            }
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Calculate health metrics for connection (pure function)
    pub fn calculate_health_metrics(
        connected_since: Option<Instant>,
        last_inbound: Option<Instant>,
        reconnect_count: u32,
        keep_alive: Duration,
    ) -> HealthMetrics {
        let now = Instant::now();

        let uptime = connected_since.map(|t| now.duration_since(t));
        let time_since_last_inbound = last_inbound.map(|t| now.duration_since(t));

        HealthMetrics {
            uptime,
            time_since_last_inbound,
            reconnect_count,
            is_healthy: Self::determine_health_status(uptime, time_since_last_inbound, keep_alive),
        }
    }

    /// Healthy while connected and the broker has spoken within 1.5 keep-alive intervals
    fn determine_health_status(
        uptime: Option<Duration>,
        time_since_last_inbound: Option<Duration>,
        keep_alive: Duration,
    ) -> bool {
        match (uptime, time_since_last_inbound) {
            (Some(_), None) => true,
            (Some(_), Some(_)) if keep_alive.is_zero() => true,
            (Some(_), Some(quiet)) => quiet < keep_alive + keep_alive / 2,
            _ => false,
        }
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!(target: "mqtt_transport", "Connection established");
            }
            (ConnectionState::Reconnecting(attempt), ConnectionState::Connected) => {
                info!(target: "mqtt_transport", attempt, "Reconnection successful");
            }
            (ConnectionState::Connected, ConnectionState::Reconnecting(_)) => {
                warn!(target: "mqtt_transport", "Connection lost, recovering");
            }
            (ConnectionState::Reconnecting(_), ConnectionState::Reconnecting(attempt)) => {
                info!(target: "mqtt_transport", attempt, "Starting reconnection attempt");
            }
            (ConnectionState::Reconnecting(attempt), ConnectionState::Disconnected) => {
                error!(target: "mqtt_transport", attempt, "Gave up reconnecting");
            }
            _ => {
                info!(target: "mqtt_transport", "Connection state: {:?} -> {:?}", from, to);
            }
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq, Eq)]
pub enum ReconnectionDecision {
    /// Sleep for `delay`, then make attempt number `attempt`
    Proceed { attempt: u32, delay: Duration },
    /// The caller disconnected; stop recovering
    AbortDisconnectRequested,
    /// The attempt cap is spent
    AbortMaxAttemptsExceeded,
}

/// What the keep-alive task should do next
#[derive(Debug, PartialEq, Eq)]
pub enum KeepAliveAction {
    Wait(Duration),
    SendProbe,
    Expired,
}

/// Health metrics for connection monitoring
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    /// Time since the current connection was established
    pub uptime: Option<Duration>,
    /// Time since any packet was last received
    pub time_since_last_inbound: Option<Duration>,
    /// Successful reconnects over the client's lifetime
    pub reconnect_count: u32,
    pub is_healthy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::connection::{ExponentialBackoff, FixedBackoff};

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_should_attempt_reconnection_unlimited() {
        let policy = ExponentialBackoff::new(ms(100), ms(1000));

        assert_eq!(
            HealthMonitor::should_attempt_reconnection(0, &policy, false),
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay: ms(100)
            }
        );
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(3, &policy, false),
            ReconnectionDecision::Proceed {
                attempt: 4,
                delay: ms(800)
            }
        );
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(10_000, &policy, false),
            ReconnectionDecision::Proceed {
                attempt: 10_001,
                delay: ms(1000)
            }
        );
    }

    #[test]
    fn test_should_attempt_reconnection_disconnect_wins() {
        let policy = FixedBackoff::new(ms(10));
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(0, &policy, true),
            ReconnectionDecision::AbortDisconnectRequested
        );
    }

    #[test]
    fn test_should_attempt_reconnection_cap() {
        let policy = FixedBackoff::new(ms(10)).with_max_attempts(3);

        assert!(matches!(
            HealthMonitor::should_attempt_reconnection(2, &policy, false),
            ReconnectionDecision::Proceed { attempt: 3, .. }
        ));
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(3, &policy, false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
    }

    #[test]
    fn test_retryable_refusals() {
        assert!(HealthMonitor::is_retryable_refusal(
            ConnectReturnCode::ServiceUnavailable
        ));
        assert!(!HealthMonitor::is_retryable_refusal(
            ConnectReturnCode::BadUserNamePassword
        ));
        assert!(!HealthMonitor::is_retryable_refusal(
            ConnectReturnCode::BadClientId
        ));
    }

    #[test]
    fn test_keepalive_waits_until_due() {
        let start = Instant::now();
        let action = HealthMonitor::keepalive_action(
            start,
            start,
            None,
            start + ms(400),
            ms(1000),
            ms(500),
        );
        assert_eq!(action, KeepAliveAction::Wait(ms(600)));
    }

    #[test]
    fn test_keepalive_probes_after_quiet_interval() {
        let start = Instant::now();
        let action =
            HealthMonitor::keepalive_action(start, start, None, start + ms(1000), ms(1000), ms(500));
        assert_eq!(action, KeepAliveAction::SendProbe);
    }

    #[test]
    fn test_keepalive_probes_when_only_receiving() {
        let start = Instant::now();
        let recent_inbound = start + ms(900);

        let action = HealthMonitor::keepalive_action(
            recent_inbound,
            start,
            None,
            start + ms(1000),
            ms(1000),
            ms(500),
        );
        assert_eq!(action, KeepAliveAction::SendProbe);
    }

    #[test]
    fn test_keepalive_probes_when_only_sending() {
        let start = Instant::now();
        let recent_outbound = start + ms(900);

        let action = HealthMonitor::keepalive_action(
            start,
            recent_outbound,
            None,
            start + ms(1000),
            ms(1000),
            ms(500),
        );
        assert_eq!(action, KeepAliveAction::SendProbe);
    }

    #[test]
    fn test_keepalive_expires_after_grace() {
        let start = Instant::now();
        let probe = start + ms(1000);

        assert_eq!(
            HealthMonitor::keepalive_action(start, probe, Some(probe), probe + ms(200), ms(1000), ms(500)),
            KeepAliveAction::Wait(ms(300))
        );
        assert_eq!(
            HealthMonitor::keepalive_action(start, probe, Some(probe), probe + ms(500), ms(1000), ms(500)),
            KeepAliveAction::Expired
        );
    }

    #[test]
    fn test_keepalive_answered_probe_restarts_interval() {
        let start = Instant::now();
        let probe = start + ms(1000);
        let answered = probe + ms(50);

        let action = HealthMonitor::keepalive_action(
            answered,
            probe,
            Some(probe),
            answered + ms(100),
            ms(1000),
            ms(500),
        );
        assert_eq!(action, KeepAliveAction::Wait(ms(850)));
    }

    #[test]
    fn test_can_publish() {
        assert!(HealthMonitor::can_publish(&ConnectionState::Connected));
        assert!(!HealthMonitor::can_publish(&ConnectionState::Connecting));
        assert!(!HealthMonitor::can_publish(&ConnectionState::Reconnecting(1)));
        assert!(!HealthMonitor::can_publish(&ConnectionState::Disconnected));
    }

    #[test]
    fn test_health_metrics() {
        let now = Instant::now();

        let disconnected = HealthMonitor::calculate_health_metrics(None, None, 0, ms(1000));
        assert!(!disconnected.is_healthy);
        assert!(disconnected.uptime.is_none());

        let fresh = HealthMonitor::calculate_health_metrics(Some(now), None, 2, ms(1000));
        assert!(fresh.is_healthy);
        assert_eq!(fresh.reconnect_count, 2);

        let quiet = HealthMonitor::calculate_health_metrics(
            Some(now),
            Some(now),
            0,
            Duration::ZERO,
        );
        assert!(quiet.is_healthy);
    }

    #[test]
    fn test_health_status_tracks_keep_alive() {
        assert!(HealthMonitor::determine_health_status(
            Some(ms(10_000)),
            Some(ms(1_400)),
            ms(1000)
        ));
        assert!(!HealthMonitor::determine_health_status(
            Some(ms(10_000)),
            Some(ms(1_600)),
            ms(1000)
        ));
    }
}
