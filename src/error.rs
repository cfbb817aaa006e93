//! Error handling for the Direct Line streaming core.

use std::{string::FromUtf8Error, time::Duration};

use thiserror::Error;

/// The main result type used throughout the crate.
pub type DirectLineResult<T> = Result<T, DirectLineError>;

/// Comprehensive error type for all client operations.
#[derive(Error, Debug)]
pub enum DirectLineError {
    /// HTTP request errors (token refresh, attachment fetch)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected status code from the service
    #[error("API error: status={status}, body={body}")]
    Api {
        status: http::StatusCode,
        body: String,
    },

    /// Wire protocol violation (wrong stream or activity count)
    #[error("Protocol violation: {message}")]
    Protocol { message: String },

    /// Errors raised by the streaming transport implementation
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The connection (or the controller task) has gone away
    #[error("Connection closed{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    ConnectionClosed { reason: Option<String> },

    /// The client was ended; no further operations are possible
    #[error("Connection has ended")]
    Ended,

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<FromUtf8Error> for DirectLineError {
    fn from(e: FromUtf8Error) -> Self {
        Self::Serialization(serde_json::Error::io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        )))
    }
}

impl DirectLineError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a protocol violation error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an API error.
    pub fn api(status: http::StatusCode, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
        }
    }

    /// Create a connection-closed error.
    pub fn connection_closed(reason: Option<String>) -> Self {
        Self::ConnectionClosed { reason }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Terminal failure delivered on the activity stream.
///
/// Kept separate from [`DirectLineError`] because it travels through a
/// broadcast channel and therefore must be `Clone`.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ActivityStreamError {
    /// Token refresh retries were exhausted before the transport dropped.
    #[error("Token unavailable")]
    TokenUnavailable,

    /// The server pushed an activity set violating the one-activity invariant
    /// or one that could not be parsed at all.
    #[error("Invalid activity set: {reason}")]
    InvalidActivitySet { reason: String },

    /// Reconnection attempts were exhausted.
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },
}
