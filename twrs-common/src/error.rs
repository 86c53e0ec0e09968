//! Error types for the relative-strength monitor.
//!
//! Every failure ends up as one human-readable message. Variants exist so the
//! logs can say which stage failed; callers that face the user only ever show
//! [`Error::user_message`].

use thiserror::Error;

/// Result type alias using the monitor error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The feed answered but had nothing for the requested day
    /// (non-trading day, not yet published).
    #[error("Feed unavailable: {0}")]
    FeedUnavailable(String),

    /// The feed answered but no usable rows survived parsing
    #[error("Parse failure: {0}")]
    Parse(String),

    /// The request itself failed (connect, timeout, non-2xx)
    #[error("Network failure: {0}")]
    Network(String),

    /// The chat webhook rejected the message or could not be reached
    #[error("Notification failure: {0}")]
    Notification(String),

    /// State store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid input from the user
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Check if the feed had no data for the day (as opposed to a hard failure).
    pub fn is_feed_unavailable(&self) -> bool {
        matches!(self, Self::FeedUnavailable(_))
    }

    /// The message shown to the user.
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// Process exit code for CLI commands failing with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::FeedUnavailable(_) => 3,
            Self::Parse(_) | Self::Network(_) => 4,
            Self::Notification(_) => 5,
            Self::InvalidInput(_) | Self::Config(_) => 2,
            _ => 1,
        }
    }
}
