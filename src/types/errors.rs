//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Variants
//! follow the supervisor's failure taxonomy: configuration errors abort an
//! operation, `Changed` is the recoverable optimistic-concurrency loss,
//! connectivity errors mean "that role is not running".

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the supervisor.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad service name, conflicting manager/managed fields, depth violation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Run-state file content differed from the writer's snapshot.
    #[error("run state changed: {0}")]
    Changed(String),

    /// Refused connection or malformed reply from a peer role.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Empty, unknown or malformed control command.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bounded wait elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wire error code used in structured rejection replies.
    pub fn to_reply_code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "CONFIGURATION",
            Error::Changed(_) => "CHANGED",
            Error::Connectivity(_) => "UNAVAILABLE",
            Error::Protocol(_) => "PROTOCOL",
            Error::Timeout(_) => "DEADLINE_EXCEEDED",
            Error::Internal(_) | Error::Serialization(_) | Error::Io(_) => "INTERNAL",
        }
    }

    /// Connectivity failures are how a dead advertised role is discovered.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Connectivity(_))
    }
}

// Convenience constructors
impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn changed(msg: impl Into<String>) -> Self {
        Self::Changed(msg.into())
    }

    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
