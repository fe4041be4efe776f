//! Connection-level configuration passed to `Connector::connect`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ConfigError, RedeliveryPolicy};

/// How many messages the broker pushes ahead of `receive` calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchPolicy {
    pub queue_prefetch: u32,
    pub topic_prefetch: u32,
    pub durable_topic_prefetch: u32,
    pub optimize_durable_topic_prefetch: u32,
}

impl Default for PrefetchPolicy {
    fn default() -> Self {
        Self {
            queue_prefetch: 1000,
            topic_prefetch: 32766,
            durable_topic_prefetch: 100,
            optimize_durable_topic_prefetch: 1000,
        }
    }
}

/// Material used to trust the broker's certificate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrustMaterial {
    TrustStore { path: PathBuf, password: String },
    CertFile(PathBuf),
}

/// Material identifying this client to the broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyMaterial {
    CertAndKey {
        cert_file: PathBuf,
        key_file: PathBuf,
        #[serde(default)]
        key_password: Option<String>,
    },
    KeyStore {
        path: PathBuf,
        password: String,
    },
}

/// TLS settings. Files are only checked for shape here; loading them is
/// the broker client's job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureSocket {
    pub cert: TrustMaterial,
    #[serde(default)]
    pub key: Option<KeyMaterial>,
}

impl SecureSocket {
    pub fn trusting(cert_file: impl Into<PathBuf>) -> Self {
        Self {
            cert: TrustMaterial::CertFile(cert_file.into()),
            key: None,
        }
    }

    pub fn with_key(mut self, key: KeyMaterial) -> Self {
        self.key = Some(key);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let empty = |path: &PathBuf| path.as_os_str().is_empty();
        match &self.cert {
            TrustMaterial::CertFile(path) if empty(path) => {
                return Err(ConfigError::InvalidSecureSocket(
                    "trusted certificate path is empty".into(),
                ))
            }
            TrustMaterial::TrustStore { path, .. } if empty(path) => {
                return Err(ConfigError::InvalidSecureSocket(
                    "trust store path is empty".into(),
                ))
            }
            _ => {}
        }
        match &self.key {
            Some(KeyMaterial::CertAndKey {
                cert_file,
                key_file,
                ..
            }) if empty(cert_file) || empty(key_file) => Err(ConfigError::InvalidSecureSocket(
                "client certificate and key files are both required".into(),
            )),
            Some(KeyMaterial::KeyStore { path, .. }) if empty(path) => Err(
                ConfigError::InvalidSecureSocket("key store path is empty".into()),
            ),
            _ => Ok(()),
        }
    }
}

fn random_client_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_true() -> bool {
    true
}

/// Settings for one broker connection, shared by every subscription on it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Defaults to a random UUID.
    #[serde(default = "random_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub secure_socket: Option<SecureSocket>,
    #[serde(default)]
    pub optimize_acknowledgements: bool,
    #[serde(default = "default_true")]
    pub always_session_async: bool,
    #[serde(default)]
    pub prefetch_policy: Option<PrefetchPolicy>,
    #[serde(default)]
    pub redelivery_policy: Option<RedeliveryPolicy>,
    /// Extra client properties passed through to the broker client.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            client_id: random_client_id(),
            secure_socket: None,
            optimize_acknowledgements: false,
            always_session_async: true,
            prefetch_policy: None,
            redelivery_policy: None,
            properties: HashMap::new(),
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_secure_socket(mut self, secure_socket: SecureSocket) -> Self {
        self.secure_socket = Some(secure_socket);
        self
    }

    pub fn with_prefetch_policy(mut self, policy: PrefetchPolicy) -> Self {
        self.prefetch_policy = Some(policy);
        self
    }

    pub fn with_redelivery_policy(mut self, policy: RedeliveryPolicy) -> Self {
        self.redelivery_policy = Some(policy);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.is_some() != self.password.is_some() {
            return Err(ConfigError::IncompleteCredentials);
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::EmptyClientId);
        }
        if let Some(secure_socket) = &self.secure_socket {
            secure_socket.validate()?;
        }
        if let Some(policy) = &self.redelivery_policy {
            policy.validate()?;
        }
        Ok(())
    }
}
