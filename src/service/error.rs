//! Error types for message handlers.

use std::error::Error;
use std::fmt;

use crate::broker::BrokerError;

/// Error returned by a message or error handler.
#[derive(Debug)]
pub enum HandlerError {
    /// Business logic rejected the message.
    Rejected(String),
    /// Payload decode / deserialization failed.
    DecodeFailed(String),
    /// A `Caller` operation failed inside the handler.
    Transport(BrokerError),
    /// The handler panicked.
    Panicked(String),
    /// The handler was invoked without an argument its shape requires.
    MissingArgument(&'static str),
    /// Other error.
    Other(Box<dyn Error + Send + Sync>),
}

impl HandlerError {
    /// Wrap any error as `HandlerError::Other`.
    pub fn other(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        HandlerError::Other(err.into())
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Rejected(msg) => write!(f, "rejected: {}", msg),
            HandlerError::DecodeFailed(msg) => write!(f, "decode failed: {}", msg),
            HandlerError::Transport(e) => write!(f, "transport error: {}", e),
            HandlerError::Panicked(msg) => write!(f, "handler panicked: {}", msg),
            HandlerError::MissingArgument(name) => write!(f, "missing argument: {}", name),
            HandlerError::Other(e) => write!(f, "handler error: {}", e),
        }
    }
}

impl Error for HandlerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HandlerError::Transport(e) => Some(e),
            HandlerError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<BrokerError> for HandlerError {
    fn from(err: BrokerError) -> Self {
        HandlerError::Transport(err)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}

impl From<bitcode::Error> for HandlerError {
    fn from(err: bitcode::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}
