//! Port Interfaces
//!
//! Defines the transport contract following the Hexagonal Architecture
//! pattern. The service loop is the only driver of a `Transport`; adapters
//! own socket I/O, TLS and WebSocket framing.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: event-pumped WebSocket connection
//! - `TransportFactory`: creates a fresh transport per session

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::connection::ConnectTarget;

/// Events reported by a transport from `Transport::service`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection handshake completed.
    Established,
    /// A text frame arrived.
    Data(String),
    /// The transport can accept an outbound frame.
    Writable,
    /// The peer closed the connection or the stream ended.
    Closed,
    /// A pong answered one of our pings.
    Pong,
    /// The connection failed.
    Error(String),
}

/// Outbound frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// UTF-8 text frame.
    Text,
    /// Protocol-level ping.
    Ping,
}

/// How to close a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Close handshake with a normal status.
    Normal,
    /// Drop the connection without a handshake (dead peer).
    Abnormal,
}

/// Errors raised by transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint could not be turned into a connectable URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// An operation needed an open connection.
    #[error("transport is not open")]
    NotOpen,

    /// Dialing or handshaking failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Proxy negotiation failed.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// A frame could not be written.
    #[error("write failed: {0}")]
    Write(String),

    /// Payload is not valid for the requested frame kind.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Event-driven connection to the feed.
///
/// The contract mirrors a poll-style WebSocket library: `open` starts a
/// connection without blocking, and `service` must be called repeatedly to
/// make progress and receive events. `request_writable` asks for a
/// `TransportEvent::Writable` on a later `service` call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send {
    /// Begin connecting to `target`. Completion is reported through
    /// `TransportEvent::Established` or `TransportEvent::Error`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot even be started.
    fn open(&mut self, target: &ConnectTarget) -> Result<(), TransportError>;

    /// Pump I/O for at most `timeout` and return the next event, if any.
    async fn service(&mut self, timeout: Duration) -> Option<TransportEvent>;

    /// Ask for a writable notification.
    fn request_writable(&mut self);

    /// Write one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is not open or the write fails.
    async fn write(&mut self, payload: &[u8], kind: FrameKind) -> Result<(), TransportError>;

    /// Close the connection and release its resources.
    async fn close(&mut self, kind: CloseKind);
}

/// Creates transports for new sessions.
pub trait TransportFactory: Send + Sync {
    /// Create an unopened transport.
    fn create(&self) -> Box<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Box<dyn Transport> + Send + Sync,
{
    fn create(&self) -> Box<dyn Transport> {
        self()
    }
}
