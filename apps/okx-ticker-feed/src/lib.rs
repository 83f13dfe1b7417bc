#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! OKX Ticker Feed - Public Market Data Client
//!
//! Keeps one WebSocket session open against OKX's public feed and turns
//! `tickers` push frames into `TickerRecord`s handed to a consumer callback.
//! Liveness is checked with protocol pings; lost connections are rebuilt
//! with capped exponential backoff and subscriptions are replayed.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Feed data types with no I/O
//!   - `ticker`: Ticker snapshot records (fields kept as text)
//!   - `connection`: Endpoint, proxy and lifecycle state
//!   - `subscription`: `(channel, instId)` pairs and their registry
//!
//! - **Application**: Port definitions and shared services
//!   - `ports`: Event-pumped `Transport` contract
//!   - `services`: Outbound send queue and ticker dispatch
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `okx`: Feed client, ticker parser, messages, WebSocket transport
//!   - `config`: Environment configuration
//!   - `health`: Health check and metrics HTTP endpoint
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Logging and OpenTelemetry tracing
//!
//! # Data Flow
//!
//! ```text
//!                  +-------------------------- service loop ---------------------------+
//! OKX WS --frames--> Transport --Data--> parse_tickers --records--> TickerDispatcher --+--> callback
//!                  |     ^                                                              |
//!                  |     +--Writable-- SendQueue <--enqueue-- subscribe / send          |
//!                  +--------------------------------------------------------------------+
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core feed types with no transport dependencies.
pub mod domain;

/// Application layer - Port definitions and shared services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectTarget, ConnectionState, Endpoint, ProxyKind, ProxySettings};
pub use domain::subscription::{Channel, Subscription};
pub use domain::ticker::TickerRecord;

// Ports
pub use application::ports::{
    CloseKind, FrameKind, Transport, TransportError, TransportEvent, TransportFactory,
};

// Feed client
pub use infrastructure::okx::{ClientError, FeedClient, WsTransport, parse_tickers};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ConnectionSettings, FeedConfig, ServerSettings};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
