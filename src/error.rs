use std::error::Error;
use std::fmt;

use crate::broker::BrokerError;
use crate::config::ConfigError;
use crate::listener::ListenerState;
use crate::service::{HandlerError, ServiceId, ValidationError};

/// Category of a [`ListenerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Connection,
    Consumer,
    Transport,
    Handler,
    Lifecycle,
}

/// Errors surfaced by the listener, either returned from `init`/`attach`/
/// `detach` or delivered asynchronously to `on_error` handlers.
#[derive(Debug)]
pub enum ListenerError {
    /// Bad or missing subscription/connection settings.
    Configuration(ConfigError),
    /// The service is not attachable.
    Validation(ValidationError),
    /// The broker connection or a session could not be created.
    Connection(BrokerError),
    /// The consumer could not be created (bad destination or selector).
    Consumer(BrokerError),
    /// A receive, acknowledge, commit or rollback failed while running.
    Transport(BrokerError),
    /// A user handler failed.
    Handler(HandlerError),
    /// The operation is not valid in the listener's current state.
    InvalidState {
        operation: &'static str,
        state: ListenerState,
    },
    /// The service is already attached.
    AlreadyAttached(ServiceId),
    /// No receiver is attached for the service.
    NotAttached(ServiceId),
}

impl ListenerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ListenerError::Configuration(_) => ErrorKind::Configuration,
            ListenerError::Validation(_) => ErrorKind::Validation,
            ListenerError::Connection(_) => ErrorKind::Connection,
            ListenerError::Consumer(_) => ErrorKind::Consumer,
            ListenerError::Transport(_) => ErrorKind::Transport,
            ListenerError::Handler(_) => ErrorKind::Handler,
            ListenerError::InvalidState { .. }
            | ListenerError::AlreadyAttached(_)
            | ListenerError::NotAttached(_) => ErrorKind::Lifecycle,
        }
    }

    /// The broker failure behind this error, if any.
    pub fn broker_error(&self) -> Option<&BrokerError> {
        match self {
            ListenerError::Connection(e) | ListenerError::Consumer(e) | ListenerError::Transport(e) => {
                Some(e)
            }
            ListenerError::Handler(HandlerError::Transport(e)) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerError::Configuration(e) => write!(f, "configuration error: {}", e),
            ListenerError::Validation(e) => write!(f, "validation error: {}", e),
            ListenerError::Connection(e) => write!(f, "connection error: {}", e),
            ListenerError::Consumer(e) => write!(f, "consumer error: {}", e),
            ListenerError::Transport(e) => write!(f, "failed to fetch the message: {}", e),
            ListenerError::Handler(e) => write!(f, "handler failed: {}", e),
            ListenerError::InvalidState { operation, state } => {
                write!(f, "cannot {} while listener is {}", operation, state)
            }
            ListenerError::AlreadyAttached(id) => write!(f, "service {} is already attached", id),
            ListenerError::NotAttached(id) => write!(f, "service {} is not attached", id),
        }
    }
}

impl Error for ListenerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ListenerError::Configuration(e) => Some(e),
            ListenerError::Validation(e) => Some(e),
            ListenerError::Connection(e) | ListenerError::Consumer(e) | ListenerError::Transport(e) => {
                Some(e)
            }
            ListenerError::Handler(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for ListenerError {
    fn from(err: ConfigError) -> Self {
        ListenerError::Configuration(err)
    }
}

impl From<ValidationError> for ListenerError {
    fn from(err: ValidationError) -> Self {
        ListenerError::Validation(err)
    }
}

impl From<HandlerError> for ListenerError {
    fn from(err: HandlerError) -> Self {
        ListenerError::Handler(err)
    }
}
