//! Subscription Types
//!
//! A subscription is a `(channel, instId)` pair. Subscribing never waits for
//! an acknowledgment; the ack is implicit in ticker frames arriving later.
//!
//! # Design
//!
//! The registry remembers every accepted subscription for the current
//! session so that an automatic reconnect can replay them on the new
//! connection. An explicit disconnect ends the session and clears it.

use std::fmt;

use parking_lot::RwLock;

/// Public channel names understood by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Channel {
    /// Best bid/ask, last trade and 24h statistics.
    #[default]
    Tickers,
}

impl Channel {
    /// Get the channel name as sent on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tickers => "tickers",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single channel subscription for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    /// Channel name.
    pub channel: Channel,
    /// Instrument ID, e.g. `BTC-USDT`.
    pub inst_id: String,
}

impl Subscription {
    /// Ticker subscription for an instrument.
    #[must_use]
    pub fn tickers(inst_id: impl Into<String>) -> Self {
        Self {
            channel: Channel::Tickers,
            inst_id: inst_id.into(),
        }
    }
}

/// Accepted subscriptions, in the order they were first requested.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<Vec<Subscription>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription. Returns `false` if it was already present.
    pub fn insert(&self, subscription: Subscription) -> bool {
        let mut entries = self.entries.write();
        if entries.contains(&subscription) {
            return false;
        }
        entries.push(subscription);
        true
    }

    /// Forget a subscription. Returns `false` if it was not present.
    pub fn remove(&self, subscription: &Subscription) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|s| s != subscription);
        entries.len() != before
    }

    /// Snapshot of the current subscriptions.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.entries.read().clone()
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if there are no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
