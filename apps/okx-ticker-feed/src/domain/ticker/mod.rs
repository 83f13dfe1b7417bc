//! Ticker Records
//!
//! One `TickerRecord` is a snapshot of a single instrument as pushed on the
//! OKX `tickers` channel.
//!
//! # Wire Format (JSON)
//! ```json
//! {"instType":"SPOT","instId":"BTC-USDT","last":"43250.5","lastSz":"0.1234",
//!  "askPx":"43251.0","askSz":"1.5","bidPx":"43249.5","bidSz":"2.3",
//!  "open24h":"42000.0","high24h":"43500.0","low24h":"41500.0",
//!  "volCcy24h":"1234567.89","vol24h":"29.456","sodUtc0":"42100.0",
//!  "sodUtc8":"42150.0","ts":"1703073600000"}
//! ```
//!
//! Every field is kept as the text the exchange sent. Prices and sizes
//! arrive as quoted decimal strings, and a text -> number -> text round trip
//! would change their representation (`"43251.0"` must stay `"43251.0"`).
//! Typed views are computed on demand by the accessor methods.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Snapshot of one instrument's best bid/ask, last trade and 24h stats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerRecord {
    /// Instrument type (`SPOT`, `SWAP`, `FUTURES`, `OPTION`).
    #[serde(rename = "instType", default)]
    pub inst_type: String,
    /// Instrument ID, e.g. `BTC-USDT`. Never empty on a delivered record.
    #[serde(rename = "instId", default)]
    pub inst_id: String,
    /// Last traded price.
    #[serde(default)]
    pub last: String,
    /// Last traded size.
    #[serde(rename = "lastSz", default)]
    pub last_sz: String,
    /// Best ask price.
    #[serde(rename = "askPx", default)]
    pub ask_px: String,
    /// Best ask size.
    #[serde(rename = "askSz", default)]
    pub ask_sz: String,
    /// Best bid price.
    #[serde(rename = "bidPx", default)]
    pub bid_px: String,
    /// Best bid size.
    #[serde(rename = "bidSz", default)]
    pub bid_sz: String,
    /// Open price in the past 24 hours.
    #[serde(rename = "open24h", default)]
    pub open_24h: String,
    /// Highest price in the past 24 hours.
    #[serde(rename = "high24h", default)]
    pub high_24h: String,
    /// Lowest price in the past 24 hours.
    #[serde(rename = "low24h", default)]
    pub low_24h: String,
    /// 24h trading volume in quote currency.
    #[serde(rename = "volCcy24h", default)]
    pub vol_ccy_24h: String,
    /// 24h trading volume in base currency.
    #[serde(rename = "vol24h", default)]
    pub vol_24h: String,
    /// Open price at UTC 00:00.
    #[serde(rename = "sodUtc0", default)]
    pub sod_utc0: String,
    /// Open price at UTC+8 00:00.
    #[serde(rename = "sodUtc8", default)]
    pub sod_utc8: String,
    /// Data generation time, Unix milliseconds.
    #[serde(default)]
    pub ts: String,
}

impl TickerRecord {
    /// Whether the record identifies an instrument.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.inst_id.is_empty()
    }

    /// Last traded price as a decimal.
    #[must_use]
    pub fn last_price(&self) -> Option<Decimal> {
        parse_decimal(&self.last)
    }

    /// Best bid price as a decimal.
    #[must_use]
    pub fn best_bid(&self) -> Option<Decimal> {
        parse_decimal(&self.bid_px)
    }

    /// Best ask price as a decimal.
    #[must_use]
    pub fn best_ask(&self) -> Option<Decimal> {
        parse_decimal(&self.ask_px)
    }

    /// Midpoint between best bid and best ask.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        bid.checked_add(ask).map(|sum| sum / Decimal::TWO)
    }

    /// Best ask minus best bid.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        self.best_ask()?.checked_sub(self.best_bid()?)
    }

    /// Data generation time.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let millis = self.ts.parse::<i64>().ok()?;
        DateTime::from_timestamp_millis(millis)
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    if text.is_empty() {
        return None;
    }
    text.parse().ok()
}
