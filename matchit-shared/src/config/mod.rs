//! # Configuration
//!
//! Client configuration: backend endpoint, credentials, logging and the
//! realtime reconciler timings.

pub mod client;

pub use client::{ClientConfig, ConfigError, ConfigOverrides, LogFormat, LoggingConfig, RealtimeConfig};
