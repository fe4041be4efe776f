//! The message record handed to `on_message` handlers.
//!
//! A [`Message`] is built from the broker's native [`BrokerMessage`] once per
//! delivery. Optional headers are only present when the broker supplied
//! them; nothing is invented beyond empty/zero values.

use std::collections::HashMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize, Serializer};

use crate::broker::{Body, BrokerError, BrokerMessage, DeliveryMode, USER_ID_PROPERTY};

/// A scalar custom property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(i) => Some(*i as f64),
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Int(i) => write!(f, "{}", i),
            PropertyValue::Float(x) => write!(f, "{}", x),
            PropertyValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(value as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

/// How the payload was obtained from the broker's native message type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    Text,
    Binary,
    Unknown,
}

/// A received message.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Broker-assigned identifier, never empty.
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    pub persistent: bool,
    pub redelivered: bool,
    pub properties: HashMap<String, PropertyValue>,
    #[serde(serialize_with = "serialize_base64")]
    pub payload: Vec<u8>,
    pub format: PayloadFormat,
}

fn serialize_base64<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(payload))
}

fn positive(value: i64) -> Option<i64> {
    (value > 0).then_some(value)
}

impl Message {
    /// Map a native broker message into a `Message`.
    ///
    /// Fails when the message carries no id or when its body cannot be
    /// read; both count as transport errors of the current delivery.
    pub fn from_broker(native: BrokerMessage) -> Result<Self, BrokerError> {
        if native.message_id.is_empty() {
            return Err(BrokerError::Io("received message has no message id".into()));
        }

        let (payload, format) = match native.body {
            Body::Text(text) => (text.into_bytes(), PayloadFormat::Text),
            Body::Bytes(bytes) => (bytes, PayloadFormat::Binary),
            Body::Object(Some(text)) => (text.into_bytes(), PayloadFormat::Unknown),
            Body::Object(None) => {
                return Err(BrokerError::Io(format!(
                    "body of message {} cannot be read",
                    native.message_id
                )))
            }
        };

        let user_id = native
            .properties
            .get(USER_ID_PROPERTY)
            .and_then(PropertyValue::as_str)
            .map(str::to_string);

        Ok(Self {
            message_id: native.message_id,
            correlation_id: native.correlation_id,
            reply_to: native.reply_to,
            destination: native.destination,
            message_type: native.message_type,
            user_id,
            timestamp: positive(native.timestamp),
            expiry: positive(native.expiration),
            delivery_time: positive(native.delivery_time),
            priority: (native.priority > 0).then_some(native.priority),
            persistent: native.delivery_mode == DeliveryMode::Persistent,
            redelivered: native.redelivered,
            properties: native.properties,
            payload,
            format,
        })
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Deserialize a JSON payload.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Decode the payload from bitcode binary format.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
        bitcode::deserialize(&self.payload)
    }

    /// Look up a custom property.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}
