//! TWRS Common - shared configuration, errors, and logging for the
//! TWSE relative-strength monitor.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Error types and handling utilities
//! - Logging setup
//! - Small string and duration helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;

pub use config::{
    Config, FeedConfig, FeedEndpointConfig, NotificationConfig, ObservabilityConfig,
    ProjectionConfig, ScheduleConfig, StorageConfig,
};
pub use error::{Error, Result};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::logging::init_logging;
}
