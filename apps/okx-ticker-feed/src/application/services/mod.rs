//! Application Services
//!
//! Services shared between the caller's context and the service loop.
//!
//! - `SendQueue`: FIFO of outbound frames, drained on writable events
//! - `TickerDispatcher`: routes parsed tickers to the registered consumer

mod dispatch;
mod send_queue;

pub use dispatch::{TickerCallback, TickerDispatcher};
pub use send_queue::SendQueue;
