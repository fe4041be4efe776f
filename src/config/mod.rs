//! Configuration records for subscriptions and broker connections.
//!
//! - [`SubscriptionConfig`]: one consumption unit (destination, ack mode,
//!   selector, polling cadence, redelivery override)
//! - [`ConnectionConfig`]: credentials, client id, TLS, prefetch and
//!   connection-wide redelivery defaults
//! - [`load_settings`]: file + environment loading via the `config` crate

mod connection;
mod error;
mod redelivery;
mod settings;
mod subscription;

pub use connection::{ConnectionConfig, KeyMaterial, PrefetchPolicy, SecureSocket, TrustMaterial};
pub use error::ConfigError;
pub use redelivery::RedeliveryPolicy;
pub use settings::{load_settings, ListenerSettings, DEFAULT_BROKER_URL, ENV_PREFIX};
pub use subscription::{
    AckMode, Destination, SubscriptionConfig, DEFAULT_POLLING_INTERVAL, DEFAULT_RECEIVE_TIMEOUT,
    EXCLUSIVE_SUFFIX,
};
