//! Service: a handler group attached to one subscription.
//!
//! A service owns one subscription configuration and its event-style entry
//! points: `on_message` (mandatory) and `on_error` (optional). Entry points
//! are stored with their declared parameter types, so declarative
//! front-ends can register raw methods with [`Service::remote`] and have
//! them checked by [`validate`](super::validate) before attachment.
//!
//! ## Example
//!
//! ```
//! use mq_listener::config::{AckMode, SubscriptionConfig};
//! use mq_listener::Service;
//!
//! let service = Service::new()
//!     .with_config(SubscriptionConfig::queue("orders").with_ack_mode(AckMode::Client))
//!     .on_message_with_caller(|message, caller| {
//!         println!("order {}", message.payload_str().unwrap_or_default());
//!         caller.acknowledge(message)?;
//!         Ok(())
//!     })
//!     .on_error(|err| {
//!         eprintln!("order consumer failed: {}", err);
//!         Ok(())
//!     });
//!
//! assert!(mq_listener::service::validate(&service).is_ok());
//! ```

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::HandlerError;
use crate::config::SubscriptionConfig;
use crate::error::ListenerError;
use crate::listener::Caller;
use crate::message::Message;

pub const ON_MESSAGE: &str = "on_message";
pub const ON_ERROR: &str = "on_error";

/// Declared type of an entry-point parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamType {
    Message,
    Caller,
    Error,
    /// Anything else a front-end declared; never attachable.
    Other(String),
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Message => write!(f, "Message"),
            ParamType::Caller => write!(f, "Caller"),
            ParamType::Error => write!(f, "Error"),
            ParamType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// One call argument.
#[derive(Debug)]
pub enum Arg {
    Message(Message),
    Caller(Caller),
    Error(ListenerError),
}

/// Arguments of one entry-point invocation, in declared order.
#[derive(Debug, Default)]
pub struct Args {
    args: Vec<Arg>,
}

impl Args {
    pub fn new(args: Vec<Arg>) -> Self {
        Self { args }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.args.get(index)
    }

    pub fn message(&self) -> Result<&Message, HandlerError> {
        self.args
            .iter()
            .find_map(|arg| match arg {
                Arg::Message(message) => Some(message),
                _ => None,
            })
            .ok_or(HandlerError::MissingArgument("message"))
    }

    pub fn caller(&self) -> Result<&Caller, HandlerError> {
        self.args
            .iter()
            .find_map(|arg| match arg {
                Arg::Caller(caller) => Some(caller),
                _ => None,
            })
            .ok_or(HandlerError::MissingArgument("caller"))
    }

    pub fn error(&self) -> Result<&ListenerError, HandlerError> {
        self.args
            .iter()
            .find_map(|arg| match arg {
                Arg::Error(err) => Some(err),
                _ => None,
            })
            .ok_or(HandlerError::MissingArgument("error"))
    }
}

/// Shared entry-point body.
pub type Body = Arc<dyn Fn(&Args) -> Result<(), HandlerError> + Send + Sync>;

/// A declared event-style entry point.
#[derive(Clone)]
pub struct RemoteMethod {
    name: String,
    params: Vec<ParamType>,
    body: Body,
}

impl RemoteMethod {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    pub fn body(&self) -> Body {
        Arc::clone(&self.body)
    }
}

impl fmt::Debug for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMethod")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Identity of a service within a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(Uuid);

impl ServiceId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A handler group: one subscription and its entry points.
#[derive(Debug)]
pub struct Service {
    id: ServiceId,
    configs: Vec<SubscriptionConfig>,
    remote: Vec<RemoteMethod>,
    resources: Vec<String>,
}

impl Default for Service {
    fn default() -> Self {
        Self::new()
    }
}

impl Service {
    pub fn new() -> Self {
        Self {
            id: ServiceId::new(),
            configs: Vec::new(),
            remote: Vec::new(),
            resources: Vec::new(),
        }
    }

    /// Associate a subscription configuration.
    pub fn with_config(mut self, config: SubscriptionConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Register `on_message` taking only the message.
    pub fn on_message<F>(self, handler: F) -> Self
    where
        F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.remote(ON_MESSAGE, vec![ParamType::Message], move |args| {
            handler(args.message()?)
        })
    }

    /// Register `on_message` taking the message and the acknowledgement
    /// gateway of the subscription's session.
    pub fn on_message_with_caller<F>(self, handler: F) -> Self
    where
        F: Fn(&Message, &Caller) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.remote(
            ON_MESSAGE,
            vec![ParamType::Message, ParamType::Caller],
            move |args| handler(args.message()?, args.caller()?),
        )
    }

    /// Register `on_error`.
    pub fn on_error<F>(self, handler: F) -> Self
    where
        F: Fn(&ListenerError) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.remote(ON_ERROR, vec![ParamType::Error], move |args| {
            handler(args.error()?)
        })
    }

    /// Declare a raw event-style entry point.
    pub fn remote<F>(mut self, name: &str, params: Vec<ParamType>, body: F) -> Self
    where
        F: Fn(&Args) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.remote.push(RemoteMethod {
            name: name.to_string(),
            params,
            body: Arc::new(body),
        });
        self
    }

    /// Declare a request/response style resource. Services with resources
    /// are never attachable.
    pub fn resource(mut self, path: &str) -> Self {
        self.resources.push(path.to_string());
        self
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    pub fn configs(&self) -> &[SubscriptionConfig] {
        &self.configs
    }

    /// The configuration, when exactly one is associated.
    pub fn config(&self) -> Option<&SubscriptionConfig> {
        match self.configs.as_slice() {
            [config] => Some(config),
            _ => None,
        }
    }

    pub fn remote_methods(&self) -> &[RemoteMethod] {
        &self.remote
    }

    pub fn method(&self, name: &str) -> Option<&RemoteMethod> {
        self.remote.iter().find(|m| m.name == name)
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }
}
