//! Configuration Module
//!
//! Configuration loading for the feed client and binary.

mod settings;

pub use settings::{ConfigError, ConnectionSettings, FeedConfig, ServerSettings};
