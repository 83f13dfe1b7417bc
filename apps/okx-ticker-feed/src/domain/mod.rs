//! Domain Layer - Core feed types with no transport dependencies.
//!
//! Types here describe what the feed delivers and how a session is
//! addressed. They carry serialization support but no I/O.

/// Connection lifecycle state and endpoint addressing.
pub mod connection;

/// Subscription pairs and the registry used to restore them.
pub mod subscription;

/// Ticker snapshot records.
pub mod ticker;
