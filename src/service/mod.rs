//! Services: handler groups that consume one subscription.
//!
//! A [`Service`] bundles a [`SubscriptionConfig`](crate::config::SubscriptionConfig)
//! with an `on_message` entry point and an optional `on_error` entry point.
//! [`validate`] checks that a service is attachable and returns the
//! [`HandlerShape`] the dispatcher binds arguments with.

mod error;
mod service;
mod validate;

pub use error::HandlerError;
pub use service::{Arg, Args, Body, ParamType, RemoteMethod, Service, ServiceId, ON_ERROR, ON_MESSAGE};
pub use validate::{validate, HandlerShape, Param, ValidationError};
