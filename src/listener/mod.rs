//! Listener runtime: receivers, dispatchers and the caller gateway.
//!
//! A [`Listener`] owns the broker connection. Each attached
//! [`Service`](crate::Service) gets a [`Receiver`] that polls its consumer
//! on a dedicated thread and hands one message at a time to a
//! [`Dispatcher`], which runs the service's handlers.

mod caller;
mod dispatcher;
mod listener;
mod receiver;

pub use caller::Caller;
pub use dispatcher::{Dispatcher, FailureSink, LogSink};
pub use listener::{Listener, ListenerState};
pub use receiver::{
    Completion, CompletionGate, Receiver, ReceiverStats, DEFAULT_MAX_CONSECUTIVE_FAILURES,
    DEFAULT_STOP_TIMEOUT,
};
