//! The broker's native message, as handed out by `Consumer::receive`.

use std::collections::HashMap;

use crate::message::PropertyValue;

/// Name of the broker-populated property carrying the authenticated user.
pub const USER_ID_PROPERTY: &str = "JMSXUserID";

/// Body of a native message.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    /// A text message.
    Text(String),
    /// A bytes message.
    Bytes(Vec<u8>),
    /// Any other message type; `None` when the body cannot be read as text.
    Object(Option<String>),
}

/// Delivery mode header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    NonPersistent,
    #[default]
    Persistent,
}

/// A message as the broker delivers it.
///
/// Header fields use the broker's conventions: zero means "not set" for the
/// numeric headers, an empty `message_id` means the broker has not assigned
/// one yet.
#[derive(Clone, Debug, PartialEq)]
pub struct BrokerMessage {
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub destination: Option<String>,
    pub message_type: Option<String>,
    /// Send time in milliseconds since the epoch.
    pub timestamp: i64,
    /// Expiration in milliseconds since the epoch.
    pub expiration: i64,
    /// Earliest delivery time in milliseconds since the epoch.
    pub delivery_time: i64,
    pub priority: u8,
    pub delivery_mode: DeliveryMode,
    pub redelivered: bool,
    /// Number of delivery attempts, starting at 1.
    pub delivery_count: u32,
    pub properties: HashMap<String, PropertyValue>,
    pub body: Body,
}

impl BrokerMessage {
    /// Create a message with the given body and default headers.
    pub fn new(body: Body) -> Self {
        Self {
            message_id: String::new(),
            correlation_id: None,
            reply_to: None,
            destination: None,
            message_type: None,
            timestamp: 0,
            expiration: 0,
            delivery_time: 0,
            priority: 4,
            delivery_mode: DeliveryMode::Persistent,
            redelivered: false,
            delivery_count: 0,
            properties: HashMap::new(),
            body,
        }
    }

    /// Create a text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Body::Text(text.into()))
    }

    /// Create a bytes message.
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Body::Bytes(bytes.into()))
    }

    /// Set a custom property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Set the absolute expiration time in milliseconds since the epoch.
    pub fn with_expiration(mut self, expiration: i64) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn non_persistent(mut self) -> Self {
        self.delivery_mode = DeliveryMode::NonPersistent;
        self
    }

    /// Look up a custom property.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}
