//! Heartbeat Monitor
//!
//! Tracks connection liveness through protocol-level ping/pong. The service
//! loop calls `check` once per tick while the connection is established:
//!
//! - a ping is due when `ping_interval` has elapsed since the last ping
//! - the peer is dead when more than `2 * ping_interval` has elapsed since
//!   the last pong
//!
//! Only pongs count as proof of life; inbound data frames do not.

use std::time::Duration;

use tokio::time::Instant;

/// Default interval between pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// A ping should be written now.
    SendPing,
    /// No pong within the timeout; the connection should be dropped.
    Timeout,
}

/// Ping/pong bookkeeping for one established connection.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    ping_interval: Duration,
    last_ping: Instant,
    last_pong: Instant,
}

impl HeartbeatMonitor {
    /// Create a monitor whose clocks start at `now`.
    #[must_use]
    pub const fn new(ping_interval: Duration, now: Instant) -> Self {
        Self {
            ping_interval,
            last_ping: now,
            last_pong: now,
        }
    }

    /// Restart both clocks, as on a freshly established connection.
    pub const fn reset(&mut self, now: Instant) {
        self.last_ping = now;
        self.last_pong = now;
    }

    /// Change the interval. Takes effect on the next check.
    pub const fn set_ping_interval(&mut self, ping_interval: Duration) {
        self.ping_interval = ping_interval;
    }

    /// Current ping interval.
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    /// Silence allowed before the peer is considered dead.
    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        self.ping_interval.saturating_mul(2)
    }

    /// Record a successfully written ping.
    pub const fn record_ping(&mut self, now: Instant) {
        self.last_ping = now;
    }

    /// Record a received pong.
    pub const fn record_pong(&mut self, now: Instant) {
        self.last_pong = now;
    }

    /// Time since the last pong.
    #[must_use]
    pub fn time_since_pong(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_pong)
    }

    /// Decide what the service loop should do at `now`.
    ///
    /// A timeout takes precedence over a due ping.
    #[must_use]
    pub fn check(&self, now: Instant) -> Option<HeartbeatEvent> {
        if self.time_since_pong(now) > self.pong_timeout() {
            return Some(HeartbeatEvent::Timeout);
        }

        if now.saturating_duration_since(self.last_ping) >= self.ping_interval {
            return Some(HeartbeatEvent::SendPing);
        }

        None
    }
}
