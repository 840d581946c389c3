//! Error types for the mDNS publication engine
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the mDNS publication engine
#[derive(Error, Debug)]
pub enum Error {
    /// A single container label could not be parsed
    #[error("Label parse error ({key}): {message}")]
    LabelParse {
        /// Label key that failed to parse
        key: String,
        /// What was wrong with the label value
        message: String,
    },

    /// The name-service daemon reports the hostname as already claimed
    #[error("Hostname collision for {hostname}: {reason}")]
    Collision {
        /// Hostname that collided
        hostname: String,
        /// Owner or daemon-provided reason
        reason: String,
    },

    /// The container listing or the name-service daemon is unreachable
    #[error("Transport error: {0}")]
    Transport(String),

    /// Container source errors that are not connectivity related
    #[error("Container source error: {0}")]
    ContainerSource(String),

    /// Name-service errors that are not connectivity related
    #[error("Name service error: {0}")]
    NameService(String),

    /// Configuration errors (fatal before the scan loop starts)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a label parse error
    pub fn label_parse(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LabelParse {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a collision error
    pub fn collision(hostname: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Collision {
            hostname: hostname.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a container source error
    pub fn container_source(msg: impl Into<String>) -> Self {
        Self::ContainerSource(msg.into())
    }

    /// Create a name service error
    pub fn name_service(msg: impl Into<String>) -> Self {
        Self::NameService(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error means a collaborator could not be reached.
    ///
    /// Transport errors turn the current tick into a no-op; everything
    /// else is handled per record.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_))
    }

    /// Whether this error is a hostname collision
    pub fn is_collision(&self) -> bool {
        matches!(self, Self::Collision { .. })
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
