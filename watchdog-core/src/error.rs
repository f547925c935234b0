//! Error types for the keepalive and relay paths
//!
//! Per-exchange failures (timeouts, malformed replies, rejected publishes) are
//! values, not errors: see [`crate::LinkResult`] and [`crate::PublishOutcome`].
//! Everything here is either fatal to a session or a validation failure caught
//! before anything reaches the wire.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Serial endpoint offered as an alternative when the configured one fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    pub device: String,
    pub description: String,
}

impl fmt::Display for PortCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.device, self.description)
    }
}

/// The serial transport could not be opened or was lost mid-session.
///
/// Fatal to the keepalive path. Carries the endpoints discovered at failure
/// time so the operator can pick another one; the list may be empty.
#[derive(Debug, Clone, Error)]
#[error("serial link {endpoint} unavailable: {reason}")]
pub struct LinkUnavailable {
    pub endpoint: String,
    pub reason: String,
    pub alternatives: Vec<PortCandidate>,
}

impl LinkUnavailable {
    pub fn new(endpoint: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
            alternatives: Vec::new(),
        }
    }

    pub fn with_alternatives(mut self, alternatives: Vec<PortCandidate>) -> Self {
        self.alternatives = alternatives;
        self
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("broker {endpoint} refused the connection: {reason}")]
    ConnectionRefused { endpoint: String, reason: String },

    #[error("broker {endpoint} rejected the supplied credentials")]
    AuthRejected { endpoint: String },

    #[error("relay session is closed")]
    SessionClosed,

    #[error("failed to encode command envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RelayError {
    /// Connection-level failures end the invocation
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::ConnectionRefused { .. } | RelayError::AuthRejected { .. } | RelayError::SessionClosed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("duration must be a positive number of milliseconds, got {0}")]
    InvalidDuration(i64),

    #[error("unknown command '{0}' (expected power, reset or listen)")]
    UnknownCommand(String),

    #[error("malformed command envelope: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("watchdog identity must not be empty")]
    Empty,

    #[error("watchdog identity '{identity}' contains reserved topic character '{found}'")]
    ReservedCharacter { identity: String, found: char },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find a configuration directory for this platform")]
    NoConfigDir,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("keepalive interval must be greater than zero")]
    ZeroInterval,
}
