//! Prometheus Metrics Module
//!
//! Exposes feed client metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames by outcome (ticker, control, discarded)
//! - **Tickers**: Records delivered to the consumer
//! - **Connection**: Connected gauge, reconnect attempts, transport errors
//! - **Queue**: Outbound queue depth and frames written
//! - **Latency**: Ticker parse duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until `init_metrics` installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "okx_feed_frames_received_total",
        "Inbound text frames by outcome"
    );
    describe_counter!(
        "okx_feed_tickers_dispatched_total",
        "Ticker records delivered to the consumer callback"
    );
    describe_counter!(
        "okx_feed_tickers_discarded_total",
        "Ticker records parsed while no consumer was registered"
    );

    describe_gauge!(
        "okx_feed_connected",
        "1 while the feed connection is established, else 0"
    );
    describe_counter!(
        "okx_feed_reconnects_total",
        "Reconnection attempts started"
    );
    describe_counter!(
        "okx_feed_connection_errors_total",
        "Connection failures by kind"
    );

    describe_gauge!(
        "okx_feed_send_queue_depth",
        "Outbound frames waiting for a writable signal"
    );
    describe_counter!(
        "okx_feed_frames_sent_total",
        "Outbound frames written to the transport"
    );

    describe_histogram!(
        "okx_feed_parse_seconds",
        "Time to scan one ticker frame"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// How an inbound frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Yielded at least one ticker record.
    Ticker,
    /// Recognised as a control event.
    Control,
    /// Neither; dropped.
    Discarded,
}

impl FrameOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Control => "control",
            Self::Discarded => "discarded",
        }
    }
}

/// Kinds of connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Transport reported an error.
    Transport,
    /// Peer closed the connection.
    Closed,
    /// No pong within the liveness timeout.
    PongTimeout,
    /// The transport could not start connecting.
    OpenFailed,
}

impl ConnectionErrorKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Closed => "closed",
            Self::PongTimeout => "pong_timeout",
            Self::OpenFailed => "open_failed",
        }
    }
}

/// Record an inbound frame.
pub fn record_frame_received(outcome: FrameOutcome) {
    counter!(
        "okx_feed_frames_received_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record ticker records handed to the consumer.
pub fn record_tickers_dispatched(count: u64) {
    counter!("okx_feed_tickers_dispatched_total").increment(count);
}

/// Record ticker records dropped for lack of a consumer.
pub fn record_tickers_discarded(count: u64) {
    counter!("okx_feed_tickers_discarded_total").increment(count);
}

/// Update the connected gauge.
pub fn set_connected(connected: bool) {
    gauge!("okx_feed_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("okx_feed_reconnects_total").increment(1);
}

/// Record a connection failure.
pub fn record_connection_error(kind: ConnectionErrorKind) {
    counter!(
        "okx_feed_connection_errors_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Update the outbound queue depth.
#[allow(clippy::cast_precision_loss)]
pub fn set_send_queue_depth(depth: usize) {
    gauge!("okx_feed_send_queue_depth").set(depth as f64);
}

/// Record outbound frames written.
pub fn record_frames_sent(count: u64) {
    counter!("okx_feed_frames_sent_total").increment(count);
}

/// Record ticker frame scan duration.
pub fn record_parse_duration(duration: Duration) {
    histogram!("okx_feed_parse_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_outcome_as_str() {
        assert_eq!(FrameOutcome::Ticker.as_str(), "ticker");
        assert_eq!(FrameOutcome::Control.as_str(), "control");
        assert_eq!(FrameOutcome::Discarded.as_str(), "discarded");
    }

    #[test]
    fn connection_error_kind_as_str() {
        assert_eq!(ConnectionErrorKind::Transport.as_str(), "transport");
        assert_eq!(ConnectionErrorKind::Closed.as_str(), "closed");
        assert_eq!(ConnectionErrorKind::PongTimeout.as_str(), "pong_timeout");
        assert_eq!(ConnectionErrorKind::OpenFailed.as_str(), "open_failed");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received(FrameOutcome::Ticker);
        record_tickers_dispatched(3);
        set_connected(true);
        set_send_queue_depth(2);
        record_parse_duration(Duration::from_micros(5));
    }
}
