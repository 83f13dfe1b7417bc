//! OKX WebSocket Adapters
//!
//! Implements the public-feed client on top of the `Transport` port:
//!
//! - **Client**: session lifecycle, watchdog and reconnect loop
//! - **Parser**: scan-based ticker frame extraction (hot path)
//! - **Messages**: subscribe requests and control events (`serde_json`)
//! - **Transport**: `tokio-tungstenite` adapter with optional proxy tunnel

pub mod client;
pub mod heartbeat;
pub mod messages;
pub mod parser;
pub mod proxy;
pub mod reconnect;
pub mod transport;

pub use client::{ClientError, FeedClient, SERVICE_TICK};
pub use heartbeat::{DEFAULT_PING_INTERVAL, HeartbeatEvent, HeartbeatMonitor};
pub use messages::{ChannelArg, ControlEvent, Operation, OperationRequest, decode_control};
pub use parser::parse_tickers;
pub use proxy::{ProxyError, establish_tunnel};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use transport::WsTransport;
