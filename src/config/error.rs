//! Error type for configuration records.

use std::fmt;

/// An invalid subscription or connection setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The destination has an empty name.
    EmptyDestination,
    /// A duration setting was zero; names the setting.
    ZeroDuration(&'static str),
    /// A durable topic subscription was declared without a subscriber name.
    MissingSubscriberName,
    /// A selector was supplied but is blank.
    EmptySelector,
    /// An acknowledgement mode string was not recognized.
    UnknownAckMode(String),
    /// The redelivery policy is inconsistent.
    InvalidRedeliveryPolicy(String),
    /// Only one of username/password was supplied.
    IncompleteCredentials,
    /// The client id is blank.
    EmptyClientId,
    /// TLS material is incomplete.
    InvalidSecureSocket(String),
    /// The settings file or environment could not be read.
    Settings(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyDestination => write!(f, "destination name must not be empty"),
            ConfigError::ZeroDuration(setting) => write!(f, "{} must be greater than zero", setting),
            ConfigError::MissingSubscriberName => {
                write!(f, "durable subscription requires a subscriber name")
            }
            ConfigError::EmptySelector => write!(f, "selector must not be blank"),
            ConfigError::UnknownAckMode(mode) => write!(f, "unknown acknowledgement mode: {}", mode),
            ConfigError::InvalidRedeliveryPolicy(msg) => {
                write!(f, "invalid redelivery policy: {}", msg)
            }
            ConfigError::IncompleteCredentials => {
                write!(f, "username and password must be supplied together")
            }
            ConfigError::EmptyClientId => write!(f, "client id must not be empty"),
            ConfigError::InvalidSecureSocket(msg) => write!(f, "invalid secure socket: {}", msg),
            ConfigError::Settings(msg) => write!(f, "settings error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<::config::ConfigError> for ConfigError {
    fn from(err: ::config::ConfigError) -> Self {
        ConfigError::Settings(err.to_string())
    }
}
