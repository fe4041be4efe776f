//! Error type for Broker Client operations.

use std::fmt;

/// A typed failure reported by the broker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker could not be reached or refused the connection.
    ConnectionFailed(String),
    /// Credentials were missing or rejected.
    AuthenticationFailed(String),
    /// TLS material was missing or unusable.
    Tls(String),
    /// The destination name is not acceptable to the broker.
    InvalidDestination(String),
    /// The selector expression could not be parsed.
    InvalidSelector(String),
    /// The operation is not valid in the current session/consumer state,
    /// e.g. `commit` on a session that is not transacted.
    IllegalState(String),
    /// The session was closed.
    SessionClosed,
    /// The consumer was closed.
    ConsumerClosed,
    /// The connection was closed.
    ConnectionClosed,
    /// Any other transport failure.
    Io(String),
    /// An internal lock was poisoned by a panicking thread.
    LockPoisoned(&'static str),
}

impl BrokerError {
    /// Whether the failure leaves the consumer permanently unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BrokerError::SessionClosed | BrokerError::ConsumerClosed | BrokerError::ConnectionClosed
        )
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            BrokerError::AuthenticationFailed(msg) => write!(f, "authentication failed: {}", msg),
            BrokerError::Tls(msg) => write!(f, "tls setup failed: {}", msg),
            BrokerError::InvalidDestination(msg) => write!(f, "invalid destination: {}", msg),
            BrokerError::InvalidSelector(msg) => write!(f, "invalid selector: {}", msg),
            BrokerError::IllegalState(msg) => write!(f, "illegal state: {}", msg),
            BrokerError::SessionClosed => write!(f, "session is closed"),
            BrokerError::ConsumerClosed => write!(f, "consumer is closed"),
            BrokerError::ConnectionClosed => write!(f, "connection is closed"),
            BrokerError::Io(msg) => write!(f, "transport error: {}", msg),
            BrokerError::LockPoisoned(operation) => {
                write!(f, "broker lock poisoned during {}", operation)
            }
        }
    }
}

impl std::error::Error for BrokerError {}
