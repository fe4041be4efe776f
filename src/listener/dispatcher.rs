//! Dispatcher: runs the user's handlers for one subscription.
//!
//! Each message is handled on its own thread so the poller only waits on
//! the completion gate. Failures go to the service's `on_error` handler
//! (also on its own thread) or, without one, to the [`FailureSink`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use tracing::{debug, error, warn};

use super::receiver::{Completion, CompletionGate};
use super::Caller;
use crate::broker::{BrokerMessage, SessionControl};
use crate::config::AckMode;
use crate::error::ListenerError;
use crate::message::Message;
use crate::service::{Arg, Args, Body, HandlerError, HandlerShape, Param};

/// Where failures end up when nobody else handles them.
pub trait FailureSink: Send + Sync {
    /// Report a failure of the subscription named `source`.
    fn report(&self, source: &str, error: &ListenerError);
}

/// Failure sink that logs through `tracing`, and optionally records each
/// report into a shared buffer.
#[derive(Clone, Default)]
pub struct LogSink {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl LogSink {
    pub fn new() -> Self {
        LogSink { buffer: None }
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        LogSink {
            buffer: Some(buffer),
        }
    }
}

impl FailureSink for LogSink {
    fn report(&self, source: &str, err: &ListenerError) {
        error!(source, kind = ?err.kind(), error = %err, "unhandled listener failure");
        if let Some(buffer) = &self.buffer {
            match buffer.lock() {
                Ok(mut buffer) => buffer.push(format!("{}: {}", source, err)),
                Err(_) => warn!(source, "failure sink buffer poisoned"),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn invoke(body: &Body, args: &Args) -> Result<(), HandlerError> {
    match panic::catch_unwind(AssertUnwindSafe(|| body(args))) {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
    }
}

/// Turns received messages into handler invocations.
pub struct Dispatcher {
    label: String,
    on_message: Body,
    on_error: Option<Body>,
    shape: HandlerShape,
    session: Weak<dyn SessionControl>,
    ack_mode: AckMode,
    sink: Arc<dyn FailureSink>,
}

impl Dispatcher {
    pub fn new(
        label: impl Into<String>,
        on_message: Body,
        on_error: Option<Body>,
        shape: HandlerShape,
        session: Weak<dyn SessionControl>,
        sink: Arc<dyn FailureSink>,
    ) -> Self {
        let ack_mode = session
            .upgrade()
            .map(|s| s.ack_mode())
            .unwrap_or_default();
        Self {
            label: label.into(),
            on_message,
            on_error,
            shape,
            session,
            ack_mode,
            sink,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn shape(&self) -> &HandlerShape {
        &self.shape
    }

    /// Handle `native` on a new thread and release `gate` when the handler
    /// terminates. The error path runs after the gate is released.
    pub fn dispatch(self: &Arc<Self>, native: BrokerMessage, gate: CompletionGate) {
        let dispatcher = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("{}-handler", self.label))
            .spawn(move || dispatcher.run(native, gate));
        // A failed spawn drops the gate, which releases it as a failure.
        if let Err(err) = spawned {
            self.on_error(ListenerError::Handler(HandlerError::other(err)));
        }
    }

    fn run(self: Arc<Self>, native: BrokerMessage, gate: CompletionGate) {
        let message = match Message::from_broker(native) {
            Ok(message) => message,
            Err(err) => {
                gate.release(Completion::Failure);
                self.on_error(ListenerError::Transport(err));
                return;
            }
        };

        debug!(
            destination = %self.label,
            message_id = %message.message_id,
            redelivered = message.redelivered,
            "dispatching message"
        );
        let message_id = message.message_id.clone();
        let args = self.arguments(message);
        match invoke(&self.on_message, &args) {
            Ok(()) => {
                gate.release(Completion::Success);
            }
            Err(err) => {
                gate.release(Completion::Failure);
                warn!(destination = %self.label, message_id = %message_id, error = %err, "message handler failed");
                self.on_error(ListenerError::Handler(err));
            }
        }
    }

    /// Build `on_message` arguments in the declared order.
    fn arguments(&self, message: Message) -> Args {
        let mut message = Some(message);
        let args = self
            .shape
            .params
            .iter()
            .filter_map(|param| match param {
                Param::Message => message.take().map(Arg::Message),
                Param::Caller => Some(Arg::Caller(Caller::new(
                    self.session.clone(),
                    self.ack_mode,
                ))),
            })
            .collect();
        Args::new(args)
    }

    /// Route `error` to `on_error` asynchronously, or to the failure sink.
    pub fn on_error(self: &Arc<Self>, error: ListenerError) {
        let Some(body) = self.on_error.clone() else {
            self.sink.report(&self.label, &error);
            return;
        };

        let dispatcher = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("{}-on-error", self.label))
            .spawn(move || {
                let args = Args::new(vec![Arg::Error(error)]);
                if let Err(failure) = invoke(&body, &args) {
                    if let Ok(original) = args.error() {
                        warn!(destination = %dispatcher.label, error = %original, "error handler failed while handling");
                    }
                    dispatcher
                        .sink
                        .report(&dispatcher.label, &ListenerError::Handler(failure));
                }
            });
        if let Err(err) = spawned {
            self.sink
                .report(&self.label, &ListenerError::Handler(HandlerError::other(err)));
        }
    }
}
