//! Broker client abstraction.
//!
//! The runtime talks to a broker only through these blocking traits:
//!
//! - [`Connector`] opens a [`Connection`] from a URL and [`ConnectionConfig`]
//! - [`Connection`] creates one [`Session`] per subscription
//! - [`Session`] creates the subscription's [`Consumer`] and carries the
//!   transaction/acknowledge operations ([`SessionControl`])
//! - [`Consumer`] receives one [`BrokerMessage`] at a time
//!
//! Associated types tie a connection to its session and consumer types, so
//! a listener is generic over exactly one broker implementation.
//! [`InMemoryBroker`] implements all of them in-process.

mod error;
mod in_memory;
mod message;
mod selector;

use std::time::Duration;

pub use error::BrokerError;
pub use in_memory::{InMemoryBroker, InMemoryConnection, InMemoryConsumer, InMemorySession, DEAD_LETTER_QUEUE};
pub use message::{Body, BrokerMessage, DeliveryMode, USER_ID_PROPERTY};
pub use selector::Selector;

use crate::config::{AckMode, ConnectionConfig, Destination, RedeliveryPolicy};

/// Opens connections to a broker.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    /// Connect to `url`. Fails on a bad URL, rejected credentials or
    /// unusable TLS settings.
    fn connect(&self, url: &str, config: &ConnectionConfig) -> Result<Self::Connection, BrokerError>;
}

/// A broker connection shared by every subscription of one listener.
///
/// Must tolerate concurrent session creation.
pub trait Connection: Send + Sync + 'static {
    type Session: Session;

    fn create_session(&self, ack_mode: AckMode) -> Result<Self::Session, BrokerError>;

    /// Start delivery to this connection's consumers.
    fn start(&self) -> Result<(), BrokerError>;

    /// Pause delivery without closing anything.
    fn stop(&self) -> Result<(), BrokerError>;

    /// Close the connection and every session created from it.
    fn close(&self) -> Result<(), BrokerError>;
}

/// Acknowledgement and transaction control of a session.
///
/// Object-safe so a `Caller` can refer to it without naming the broker.
pub trait SessionControl: Send + Sync {
    fn ack_mode(&self) -> AckMode;

    /// Commit everything received since the last commit/rollback.
    /// Only valid on a transacted session.
    fn commit(&self) -> Result<(), BrokerError>;

    /// Roll back everything received since the last commit/rollback,
    /// making it eligible for redelivery. Only valid on a transacted session.
    fn rollback(&self) -> Result<(), BrokerError>;

    /// Acknowledge `message_id` and every earlier unacknowledged message of
    /// this session. Only valid in CLIENT mode.
    fn acknowledge(&self, message_id: &str) -> Result<(), BrokerError>;
}

/// A single-threaded unit of work owned by one subscription.
pub trait Session: SessionControl + 'static {
    type Consumer: Consumer;

    /// Create a consumer. `no_local` and exclusivity are taken from the
    /// destination.
    fn create_consumer(
        &self,
        destination: &Destination,
        selector: Option<&str>,
    ) -> Result<Self::Consumer, BrokerError>;

    /// Create a durable topic subscriber identified by `name`.
    fn create_durable_subscriber(
        &self,
        destination: &Destination,
        name: &str,
        selector: Option<&str>,
    ) -> Result<Self::Consumer, BrokerError>;

    fn close(&self) -> Result<(), BrokerError>;
}

/// Pulls messages for one subscription.
pub trait Consumer: Send + Sync + 'static {
    /// Wait up to `timeout` for the next message.
    fn receive(&self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError>;

    /// Override the connection's redelivery policy for this consumer.
    fn set_redelivery_policy(&self, policy: &RedeliveryPolicy) -> Result<(), BrokerError>;

    fn close(&self) -> Result<(), BrokerError>;
}
