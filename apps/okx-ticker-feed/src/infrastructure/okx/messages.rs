//! OKX WebSocket Message Types
//!
//! Outbound operation requests and inbound control events. Ticker pushes
//! never go through these types; they are handled by the scan parser.
//!
//! # Outbound (JSON)
//! ```json
//! {"id":"1703073600","op":"subscribe","args":[{"channel":"tickers","instId":"BTC-USDT"}]}
//! ```
//!
//! # Inbound Control Events (JSON)
//! ```json
//! {"event":"subscribe","arg":{"channel":"tickers","instId":"BTC-USDT"},"connId":"a4d3ae55"}
//! {"event":"error","code":"60012","msg":"Invalid request","connId":"a4d3ae55"}
//! {"event":"notice","code":"64008","msg":"The connection will soon be closed for a service upgrade."}
//! ```
//!
//! # References
//!
//! - [OKX WebSocket API](https://www.okx.com/docs-v5/en/#overview-websocket)

use serde::{Deserialize, Serialize};

use crate::domain::subscription::Subscription;

// =============================================================================
// Outbound Requests
// =============================================================================

/// Operation carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Start receiving a channel.
    Subscribe,
    /// Stop receiving a channel.
    Unsubscribe,
}

/// Channel argument of a request or event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelArg {
    /// Channel name, e.g. `tickers`.
    pub channel: String,
    /// Instrument ID.
    #[serde(rename = "instId", default, skip_serializing_if = "String::is_empty")]
    pub inst_id: String,
}

impl From<&Subscription> for ChannelArg {
    fn from(subscription: &Subscription) -> Self {
        Self {
            channel: subscription.channel.as_str().to_string(),
            inst_id: subscription.inst_id.clone(),
        }
    }
}

/// Subscribe or unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Client-chosen request id, the current Unix time in seconds.
    pub id: String,
    /// Operation.
    pub op: Operation,
    /// Channels the operation applies to.
    pub args: Vec<ChannelArg>,
}

impl OperationRequest {
    /// Subscribe request for a single channel.
    #[must_use]
    pub fn subscribe(subscription: &Subscription) -> Self {
        Self::single(Operation::Subscribe, subscription)
    }

    /// Unsubscribe request for a single channel.
    #[must_use]
    pub fn unsubscribe(subscription: &Subscription) -> Self {
        Self::single(Operation::Unsubscribe, subscription)
    }

    fn single(op: Operation, subscription: &Subscription) -> Self {
        Self {
            id: chrono::Utc::now().timestamp().to_string(),
            op,
            args: vec![ChannelArg::from(subscription)],
        }
    }

    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Inbound Control Events
// =============================================================================

/// Non-data frame sent by the server in response to requests or on its own.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ControlEvent {
    /// Subscription acknowledged.
    Subscribe {
        /// Acknowledged channel.
        arg: ChannelArg,
        /// Server-side connection id.
        #[serde(rename = "connId", default)]
        conn_id: Option<String>,
    },
    /// Unsubscription acknowledged.
    Unsubscribe {
        /// Acknowledged channel.
        arg: ChannelArg,
        /// Server-side connection id.
        #[serde(rename = "connId", default)]
        conn_id: Option<String>,
    },
    /// Request rejected.
    Error {
        /// OKX error code.
        #[serde(default)]
        code: String,
        /// Human-readable reason.
        #[serde(default)]
        msg: String,
    },
    /// Service announcement, e.g. an upcoming disconnect for maintenance.
    Notice {
        /// OKX notice code.
        #[serde(default)]
        code: String,
        /// Announcement text.
        #[serde(default)]
        msg: String,
    },
}

/// Decode a control event, if `frame` is one.
///
/// Frames without an `event` key are skipped without invoking the JSON
/// parser.
#[must_use]
pub fn decode_control(frame: &str) -> Option<ControlEvent> {
    if !frame.contains("\"event\"") {
        return None;
    }
    serde_json::from_str(frame).ok()
}
