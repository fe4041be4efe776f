//! Message-consumption runtime for JMS-style brokers.
//!
//! Attach [`Service`]s to a [`Listener`]; each one gets its own polling
//! loop that receives one message at a time, runs the service's handler
//! and acknowledges according to the subscription's [`AckMode`](config::AckMode).

pub mod broker;
pub mod config;
pub mod listener;
pub mod service;

mod error;
mod message;

pub use broker::{BrokerError, InMemoryBroker};
pub use error::{ErrorKind, ListenerError};
pub use listener::{Caller, Listener, ListenerState};
pub use message::{Message, PayloadFormat, PropertyValue};
pub use service::{HandlerError, Service, ServiceId};
