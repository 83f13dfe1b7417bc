//! Application Layer - Port definitions and feed services.
//!
//! This layer defines the transport contract the service loop drives and
//! the two services shared between the caller and the service loop.

/// Port interfaces for external systems (WebSocket transport).
pub mod ports;

/// Outbound send queue and ticker dispatch.
pub mod services;
