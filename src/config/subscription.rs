//! Subscription configuration: one consumption unit per handler group.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, RedeliveryPolicy};

/// Suffix the broker recognizes as an exclusive-consumer request.
pub const EXCLUSIVE_SUFFIX: &str = "?consumer.exclusive=true";

/// Acknowledgement mode of a subscription's session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum AckMode {
    /// The session acknowledges each message as it is received.
    #[default]
    Auto,
    /// The handler acknowledges through the `Caller`.
    Client,
    /// The handler commits or rolls back through the `Caller`.
    Transacted,
    /// Lazy acknowledgement; duplicates are tolerated.
    DupsOk,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "AUTO_ACKNOWLEDGE",
            AckMode::Client => "CLIENT_ACKNOWLEDGE",
            AckMode::Transacted => "SESSION_TRANSACTED",
            AckMode::DupsOk => "DUPS_OK_ACKNOWLEDGE",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckMode {
    type Err = ConfigError;

    /// Unknown strings are rejected rather than defaulted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO_ACKNOWLEDGE" | "AUTO" => Ok(AckMode::Auto),
            "CLIENT_ACKNOWLEDGE" | "CLIENT" => Ok(AckMode::Client),
            "SESSION_TRANSACTED" | "TRANSACTED" => Ok(AckMode::Transacted),
            "DUPS_OK_ACKNOWLEDGE" | "DUPS_OK" => Ok(AckMode::DupsOk),
            _ => Err(ConfigError::UnknownAckMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for AckMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AckMode> for &'static str {
    fn from(mode: AckMode) -> Self {
        mode.as_str()
    }
}

/// Where a subscription consumes from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Destination {
    Queue {
        name: String,
        #[serde(default)]
        exclusive: bool,
    },
    Topic {
        name: String,
        #[serde(default)]
        exclusive: bool,
        /// Skip messages published on this subscriber's own connection.
        #[serde(default)]
        no_local: bool,
        #[serde(default)]
        durable: bool,
        #[serde(default)]
        subscriber_name: Option<String>,
    },
}

impl Destination {
    pub fn queue(name: impl Into<String>) -> Self {
        Destination::Queue {
            name: name.into(),
            exclusive: false,
        }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Destination::Topic {
            name: name.into(),
            exclusive: false,
            no_local: false,
            durable: false,
            subscriber_name: None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Destination::Queue { name, .. } | Destination::Topic { name, .. } => name,
        }
    }

    pub fn is_topic(&self) -> bool {
        matches!(self, Destination::Topic { .. })
    }

    pub fn is_exclusive(&self) -> bool {
        match self {
            Destination::Queue { exclusive, .. } | Destination::Topic { exclusive, .. } => {
                *exclusive
            }
        }
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, Destination::Topic { durable: true, .. })
    }

    pub fn no_local(&self) -> bool {
        matches!(self, Destination::Topic { no_local: true, .. })
    }

    pub fn subscriber_name(&self) -> Option<&str> {
        match self {
            Destination::Topic {
                subscriber_name, ..
            } => subscriber_name.as_deref(),
            Destination::Queue { .. } => None,
        }
    }

    /// Name handed to the broker, with the exclusive-consumer suffix when
    /// requested.
    pub fn physical_name(&self) -> String {
        if self.is_exclusive() {
            format!("{}{}", self.name(), EXCLUSIVE_SUFFIX)
        } else {
            self.name().to_string()
        }
    }

    /// `queue://name` or `topic://name`.
    pub fn uri(&self) -> String {
        match self {
            Destination::Queue { name, .. } => format!("queue://{}", name),
            Destination::Topic { name, .. } => format!("topic://{}", name),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

fn default_polling_interval() -> Duration {
    DEFAULT_POLLING_INTERVAL
}

fn default_receive_timeout() -> Duration {
    DEFAULT_RECEIVE_TIMEOUT
}

/// Description of one consumption unit.
///
/// Built once per handler group and never mutated while a receiver uses it.
///
/// ```
/// use std::time::Duration;
/// use mq_listener::config::{AckMode, SubscriptionConfig};
///
/// let config = SubscriptionConfig::topic("orders")
///     .with_ack_mode(AckMode::Client)
///     .with_selector("region = 'eu'")
///     .durable("order-audit")
///     .with_polling_interval(Duration::from_millis(250));
///
/// assert!(config.validate().is_ok());
/// assert!(config.destination().is_durable());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    destination: Destination,
    #[serde(default)]
    ack_mode: AckMode,
    #[serde(default)]
    selector: Option<String>,
    #[serde(default = "default_polling_interval", with = "seconds")]
    polling_interval: Duration,
    #[serde(default = "default_receive_timeout", with = "seconds")]
    receive_timeout: Duration,
    #[serde(default)]
    redelivery_policy: Option<RedeliveryPolicy>,
}

impl SubscriptionConfig {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            ack_mode: AckMode::default(),
            selector: None,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            redelivery_policy: None,
        }
    }

    pub fn queue(name: impl Into<String>) -> Self {
        Self::new(Destination::queue(name))
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self::new(Destination::topic(name))
    }

    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_redelivery_policy(mut self, policy: RedeliveryPolicy) -> Self {
        self.redelivery_policy = Some(policy);
        self
    }

    /// Request an exclusive consumer.
    pub fn exclusive(mut self) -> Self {
        match &mut self.destination {
            Destination::Queue { exclusive, .. } | Destination::Topic { exclusive, .. } => {
                *exclusive = true
            }
        }
        self
    }

    /// Topic only: skip messages published on this connection. No effect on queues.
    pub fn no_local(mut self) -> Self {
        if let Destination::Topic { no_local, .. } = &mut self.destination {
            *no_local = true;
        }
        self
    }

    /// Topic only: make the subscription durable under `subscriber_name`.
    /// No effect on queues.
    pub fn durable(mut self, name: impl Into<String>) -> Self {
        if let Destination::Topic {
            durable,
            subscriber_name,
            ..
        } = &mut self.destination
        {
            *durable = true;
            *subscriber_name = Some(name.into());
        }
        self
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    pub fn redelivery_policy(&self) -> Option<&RedeliveryPolicy> {
        self.redelivery_policy.as_ref()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.destination.name().trim().is_empty() {
            return Err(ConfigError::EmptyDestination);
        }
        if self.polling_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("polling interval"));
        }
        if self.receive_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("receive timeout"));
        }
        if let Destination::Topic {
            durable: true,
            subscriber_name,
            ..
        } = &self.destination
        {
            if subscriber_name.as_deref().map_or(true, |n| n.trim().is_empty()) {
                return Err(ConfigError::MissingSubscriberName);
            }
        }
        if let Some(selector) = &self.selector {
            if selector.trim().is_empty() {
                return Err(ConfigError::EmptySelector);
            }
        }
        if let Some(policy) = &self.redelivery_policy {
            policy.validate()?;
        }
        Ok(())
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
