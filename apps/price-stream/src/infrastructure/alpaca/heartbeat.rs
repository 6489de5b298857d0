//! Heartbeat Tracking
//!
//! Tracks WebSocket liveness through periodic pings. Any inbound frame counts
//! as proof of life; a ping left unanswered past `pong_timeout` means the
//! socket is dead and the session should be dropped.
//!
//! The tracker is driven from the session's own `select!` loop on every
//! interval tick, so it owns no task and no channel.

use std::time::{Duration, Instant};

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Timeout for pong response before connection is considered dead.
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
    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub const fn from_stream_settings(settings: &crate::StreamSettings) -> Self {
        Self {
            ping_interval: settings.ping_interval,
            pong_timeout: settings.pong_timeout,
        }
    }
}

/// What the session should do on an interval tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping frame.
    SendPing,
    /// Outstanding ping went unanswered; drop the session.
    TimedOut,
}

/// Liveness state for one socket.
#[derive(Debug)]
pub struct HeartbeatTracker {
    config: HeartbeatConfig,
    ping_sent_at: Option<Instant>,
}

impl HeartbeatTracker {
    /// Create a tracker for a freshly opened socket.
    #[must_use]
    pub const fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            ping_sent_at: None,
        }
    }

    /// Interval at which [`Self::on_tick`] should be called.
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        self.config.ping_interval
    }

    /// Record any inbound frame.
    pub const fn record_activity(&mut self) {
        self.ping_sent_at = None;
    }

    /// Whether a ping is awaiting an answer.
    #[must_use]
    pub const fn is_waiting_for_pong(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    /// Decide what to do at `now`.
    pub fn on_tick(&mut self, now: Instant) -> HeartbeatAction {
        match self.ping_sent_at {
            Some(sent) if now.saturating_duration_since(sent) > self.config.pong_timeout => {
                tracing::warn!(
                    waited_ms = now.saturating_duration_since(sent).as_millis(),
                    timeout_ms = self.config.pong_timeout.as_millis(),
                    "Heartbeat timeout detected"
                );
                HeartbeatAction::TimedOut
            }
            Some(_) => HeartbeatAction::SendPing,
            None => {
                self.ping_sent_at = Some(now);
                HeartbeatAction::SendPing
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(timeout_ms: u64) -> HeartbeatTracker {
        HeartbeatTracker::new(HeartbeatConfig {
            ping_interval: Duration::from_millis(10),
            pong_timeout: Duration::from_millis(timeout_ms),
        })
    }

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(20));
        assert_eq!(config.pong_timeout, Duration::from_secs(20));
    }

    #[test]
    fn first_tick_sends_ping() {
        let mut tracker = tracker(100);
        assert!(!tracker.is_waiting_for_pong());
        assert_eq!(tracker.on_tick(Instant::now()), HeartbeatAction::SendPing);
        assert!(tracker.is_waiting_for_pong());
    }

    #[test]
    fn activity_clears_outstanding_ping() {
        let mut tracker = tracker(100);
        let start = Instant::now();
        let _ = tracker.on_tick(start);
        tracker.record_activity();
        assert!(!tracker.is_waiting_for_pong());
        assert_eq!(
            tracker.on_tick(start + Duration::from_millis(500)),
            HeartbeatAction::SendPing
        );
    }

    #[test]
    fn unanswered_ping_times_out() {
        let mut tracker = tracker(100);
        let start = Instant::now();
        let _ = tracker.on_tick(start);
        assert_eq!(
            tracker.on_tick(start + Duration::from_millis(50)),
            HeartbeatAction::SendPing
        );
        assert_eq!(
            tracker.on_tick(start + Duration::from_millis(150)),
            HeartbeatAction::TimedOut
        );
    }
}
