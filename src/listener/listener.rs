//! Listener: one broker connection and the receivers attached to it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use super::{
    Dispatcher, FailureSink, LogSink, Receiver, ReceiverStats, DEFAULT_MAX_CONSECUTIVE_FAILURES,
    DEFAULT_STOP_TIMEOUT,
};
use crate::broker::{BrokerError, Connection, Connector, Consumer, Session, SessionControl};
use crate::config::{ConnectionConfig, ListenerSettings, SubscriptionConfig};
use crate::error::ListenerError;
use crate::service::{validate, RemoteMethod, Service, ServiceId, ValidationError, ON_ERROR, ON_MESSAGE};

/// Lifecycle of a [`Listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Initialized,
    Started,
    Stopping,
    Stopped,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerState::Created => "created",
            ListenerState::Initialized => "initialized",
            ListenerState::Started => "started",
            ListenerState::Stopping => "stopping",
            ListenerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

struct Inner<C: Connection> {
    state: ListenerState,
    connection: Option<C>,
    receivers: HashMap<ServiceId, Arc<Receiver<C::Session>>>,
    order: Vec<ServiceId>,
}

/// Owns one broker connection and coordinates every attached subscription.
///
/// ```
/// use std::time::Duration;
/// use mq_listener::broker::BrokerMessage;
/// use mq_listener::config::{ConnectionConfig, SubscriptionConfig};
/// use mq_listener::{InMemoryBroker, Listener, Service};
///
/// let broker = InMemoryBroker::new();
/// let listener = Listener::new(broker.clone());
/// listener.init("vm://localhost", ConnectionConfig::new()).unwrap();
///
/// let service = Service::new()
///     .with_config(SubscriptionConfig::queue("orders").with_polling_interval(Duration::from_millis(10)))
///     .on_message(|message| {
///         println!("{}", message.payload_str().unwrap_or_default());
///         Ok(())
///     });
/// listener.attach(&service).unwrap();
/// listener.start().unwrap();
///
/// broker.send("orders", BrokerMessage::text("hello")).unwrap();
/// listener.graceful_stop();
/// ```
pub struct Listener<K: Connector> {
    connector: K,
    sink: Arc<dyn FailureSink>,
    stop_timeout: Duration,
    max_consecutive_failures: u32,
    inner: Mutex<Inner<K::Connection>>,
}

impl<K: Connector> Listener<K> {
    pub fn new(connector: K) -> Self {
        Self {
            connector,
            sink: Arc::new(LogSink::new()),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            inner: Mutex::new(Inner {
                state: ListenerState::Created,
                connection: None,
                receivers: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Where failures go for services without an `on_error` handler.
    pub fn with_failure_sink(mut self, sink: impl FailureSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Grace period of [`graceful_stop`](Self::graceful_stop) and `detach`.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K::Connection>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ListenerState {
        self.lock().state
    }

    /// Open the broker connection.
    pub fn init(&self, url: &str, config: ConnectionConfig) -> Result<(), ListenerError> {
        config.validate()?;
        let mut inner = self.lock();
        if inner.state != ListenerState::Created {
            return Err(ListenerError::InvalidState {
                operation: "init",
                state: inner.state,
            });
        }

        let connection = self
            .connector
            .connect(url, &config)
            .map_err(ListenerError::Connection)?;
        inner.connection = Some(connection);
        inner.state = ListenerState::Initialized;
        info!(url, client_id = %config.client_id, "listener initialized");
        Ok(())
    }

    /// [`init`](Self::init) from loaded settings.
    pub fn init_from(&self, settings: &ListenerSettings) -> Result<(), ListenerError> {
        self.init(&settings.url, settings.connection.clone())
    }

    /// Validate `service` and create its session, consumer and receiver.
    ///
    /// Nothing is created on the broker unless validation passes. When the
    /// listener is already started the new receiver starts consuming
    /// immediately.
    pub fn attach(&self, service: &Service) -> Result<(), ListenerError> {
        let shape = validate(service)?;
        let config = service.config().ok_or(ValidationError::MissingConfig)?;
        config.validate()?;
        let on_message = service
            .method(ON_MESSAGE)
            .map(RemoteMethod::body)
            .ok_or(ValidationError::MissingOnMessage)?;
        let on_error = service.method(ON_ERROR).map(RemoteMethod::body);

        let mut inner = self.lock();
        let started = match inner.state {
            ListenerState::Initialized => false,
            ListenerState::Started => true,
            state => {
                return Err(ListenerError::InvalidState {
                    operation: "attach",
                    state,
                })
            }
        };
        let id = service.id();
        if inner.receivers.contains_key(&id) {
            return Err(ListenerError::AlreadyAttached(id));
        }
        let connection = inner
            .connection
            .as_ref()
            .ok_or(ListenerError::Connection(BrokerError::ConnectionClosed))?;

        let session = Arc::new(
            connection
                .create_session(config.ack_mode())
                .map_err(ListenerError::Connection)?,
        );
        let consumer = match open_consumer(session.as_ref(), config) {
            Ok(consumer) => consumer,
            Err(err) => {
                if let Err(close) = session.close() {
                    warn!(error = %close, "failed to close session of rejected consumer");
                }
                return Err(ListenerError::Consumer(err));
            }
        };

        let label = config.destination().uri();
        let weak: Weak<dyn SessionControl> = Arc::downgrade(&session) as Weak<dyn SessionControl>;
        let dispatcher = Arc::new(Dispatcher::new(
            label.clone(),
            on_message,
            on_error,
            shape,
            weak,
            Arc::clone(&self.sink),
        ));
        let receiver = Arc::new(
            Receiver::new(session, consumer, dispatcher, config)
                .with_max_consecutive_failures(self.max_consecutive_failures),
        );
        if started {
            if let Err(err) = receiver.consume() {
                receiver.stop(Duration::ZERO);
                return Err(err);
            }
        }

        inner.receivers.insert(id, receiver);
        inner.order.push(id);
        info!(service = %id, destination = %label, ack_mode = %config.ack_mode(), "service attached");
        Ok(())
    }

    /// Stop and remove the receiver of `service`, waiting up to the stop
    /// timeout for its in-flight handler.
    pub fn detach(&self, service: &Service) -> Result<ReceiverStats, ListenerError> {
        let id = service.id();
        let receiver = {
            let mut inner = self.lock();
            if inner.state == ListenerState::Stopped {
                return Err(ListenerError::InvalidState {
                    operation: "detach",
                    state: inner.state,
                });
            }
            let receiver = inner
                .receivers
                .remove(&id)
                .ok_or(ListenerError::NotAttached(id))?;
            inner.order.retain(|attached| *attached != id);
            receiver
        };

        let stats = receiver.stop(self.stop_timeout);
        info!(service = %id, destination = %receiver.label(), "service detached");
        Ok(stats)
    }

    /// Start the connection and every attached receiver. No-op when
    /// already started.
    pub fn start(&self) -> Result<(), ListenerError> {
        let mut inner = self.lock();
        match inner.state {
            ListenerState::Started => return Ok(()),
            ListenerState::Initialized => {}
            state => {
                return Err(ListenerError::InvalidState {
                    operation: "start",
                    state,
                })
            }
        }

        let connection = inner
            .connection
            .as_ref()
            .ok_or(ListenerError::Connection(BrokerError::ConnectionClosed))?;
        connection.start().map_err(ListenerError::Connection)?;

        // All receivers consume or none do; a failed start stays Initialized.
        let mut consuming: Vec<&Arc<Receiver<_>>> = Vec::with_capacity(inner.order.len());
        for id in &inner.order {
            let Some(receiver) = inner.receivers.get(id) else {
                continue;
            };
            if let Err(err) = receiver.consume() {
                warn!(
                    service = %id,
                    destination = %receiver.label(),
                    error = %err,
                    "receiver failed to start, rolling back"
                );
                for started in consuming {
                    started.pause();
                }
                if let Err(stop_err) = connection.stop() {
                    warn!(error = %stop_err, "failed to stop connection");
                }
                return Err(err);
            }
            consuming.push(receiver);
        }
        inner.state = ListenerState::Started;
        info!(receivers = inner.order.len(), "listener started");
        Ok(())
    }

    /// Stop every receiver, giving in-flight handlers up to the stop
    /// timeout, then close the connection.
    pub fn graceful_stop(&self) {
        self.shutdown(self.stop_timeout);
    }

    /// Stop every receiver without waiting for in-flight handlers, then
    /// close the connection.
    pub fn immediate_stop(&self) {
        self.shutdown(Duration::ZERO);
    }

    fn shutdown(&self, grace: Duration) {
        let receivers: Vec<_> = {
            let mut inner = self.lock();
            match inner.state {
                ListenerState::Stopping | ListenerState::Stopped => return,
                ListenerState::Created => {
                    inner.state = ListenerState::Stopped;
                    return;
                }
                ListenerState::Initialized | ListenerState::Started => {}
            }
            inner.state = ListenerState::Stopping;
            let order = std::mem::take(&mut inner.order);
            let mut receivers = std::mem::take(&mut inner.receivers);
            order
                .into_iter()
                .filter_map(|id| receivers.remove(&id))
                .collect()
        };

        info!(receivers = receivers.len(), grace_ms = grace.as_millis() as u64, "stopping listener");
        thread::scope(|scope| {
            for receiver in &receivers {
                scope.spawn(move || receiver.stop(grace));
            }
        });

        let connection = self.lock().connection.take();
        if let Some(connection) = connection {
            if let Err(err) = connection.stop() {
                warn!(error = %err, "failed to stop connection");
            }
            if let Err(err) = connection.close() {
                warn!(error = %err, "failed to close connection");
            }
        }
        self.lock().state = ListenerState::Stopped;
        info!("listener stopped");
    }

    /// Ids of the attached services, in attach order.
    pub fn attached(&self) -> Vec<ServiceId> {
        self.lock().order.clone()
    }

    pub fn is_consuming(&self, id: ServiceId) -> bool {
        self.lock()
            .receivers
            .get(&id)
            .is_some_and(|receiver| receiver.is_consuming())
    }

    pub fn receiver_stats(&self, id: ServiceId) -> Option<ReceiverStats> {
        self.lock().receivers.get(&id).map(|receiver| receiver.stats())
    }

    /// Run `f` against the open connection, if any.
    pub fn with_connection<R>(&self, f: impl FnOnce(&K::Connection) -> R) -> Option<R> {
        self.lock().connection.as_ref().map(f)
    }
}

fn open_consumer<S: Session>(session: &S, config: &SubscriptionConfig) -> Result<S::Consumer, BrokerError> {
    let destination = config.destination();
    let consumer = match destination.subscriber_name() {
        Some(name) if destination.is_durable() => {
            session.create_durable_subscriber(destination, name, config.selector())?
        }
        _ => session.create_consumer(destination, config.selector())?,
    };
    if let Some(policy) = config.redelivery_policy() {
        if let Err(err) = consumer.set_redelivery_policy(policy) {
            let _ = consumer.close();
            return Err(err);
        }
    }
    Ok(consumer)
}

impl<K: Connector> Drop for Listener<K> {
    fn drop(&mut self) {
        self.shutdown(Duration::ZERO);
    }
}
