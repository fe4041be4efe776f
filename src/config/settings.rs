use std::path::Path;

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use super::{ConfigError, ConnectionConfig};

pub const DEFAULT_BROKER_URL: &str = "tcp://localhost:61616";
pub const ENV_PREFIX: &str = "MQ_LISTENER";

fn default_url() -> String {
    DEFAULT_BROKER_URL.to_string()
}

/// Everything `Listener::init` needs, as read from a settings file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListenerSettings {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            url: default_url(),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Loads listener settings from an optional file, then `MQ_LISTENER_*`
/// environment variables (nested keys separated by `__`, e.g.
/// `MQ_LISTENER_CONNECTION__CLIENT_ID`). Missing fields take their defaults.
pub fn load_settings(path: Option<&Path>) -> Result<ListenerSettings, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let settings: ListenerSettings = builder.build()?.try_deserialize()?;
    settings.connection.validate()?;
    Ok(settings)
}
