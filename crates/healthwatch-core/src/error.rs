//! Error types for Healthwatch

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using Healthwatch's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Healthwatch operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal, aborts before evaluation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Alert state could not be read or written
    #[error("Storage unavailable: {0}")]
    Storage(#[from] StoreError),

    /// Notification could not be delivered
    #[error("Transport error: {0}")]
    Transport(#[from] NotifyError),

    /// Another cycle holds the alert state lock
    #[error("Alert state lock still held after {waited:?}")]
    LockContention {
        /// How long the cycle waited before giving up
        waited: Duration,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error should fail the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Failures of the alert state backing store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The state file exists but could not be read or replaced
    #[error("{}: {source}", path.display())]
    Io {
        /// State file location
        path: PathBuf,
        /// Underlying IO failure
        #[source]
        source: std::io::Error,
    },

    /// The state file holds something other than epoch seconds
    #[error("{}: not an epoch timestamp: {contents:?}", path.display())]
    Corrupt {
        /// State file location
        path: PathBuf,
        /// What was actually found
        contents: String,
    },

    /// A write would move the last alert time backwards
    #[error("refusing to move last alert time from {stored} back to {attempted}")]
    Regression {
        /// Value currently persisted
        stored: i64,
        /// Value the caller tried to write
        attempted: i64,
    },

    /// The lock file could not be opened or locked
    #[error("lock {}: {source}", path.display())]
    Lock {
        /// Lock file location
        path: PathBuf,
        /// Underlying IO failure
        #[source]
        source: std::io::Error,
    },
}

/// Notification errors
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The request never produced a response
    #[error("HTTP error: {0}")]
    Http(String),

    /// The remote end answered with a non-success status
    #[error("{channel} returned {status}: {body}")]
    Rejected {
        /// Channel kind that rejected the message
        channel: &'static str,
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// The sender was built with unusable settings
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}
