//! In-memory broker for testing and single-process scenarios.
//!
//! Implements every broker client trait against shared in-process state:
//! - Queues with competing and exclusive consumers
//! - Topics with fan-out, `no_local` and durable subscriptions that keep
//!   collecting messages while no subscriber is attached
//! - Selectors, evaluated per consumer
//! - All four acknowledgement modes, with redelivery delays taken from the
//!   redelivery policy and a dead-letter queue once it is exhausted
//! - Fault injection and counters for assertions
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use mq_listener::broker::{BrokerMessage, Connection, Connector, Consumer, InMemoryBroker, Session};
//! use mq_listener::config::{AckMode, ConnectionConfig, Destination};
//!
//! let broker = InMemoryBroker::new();
//! let connection = broker.connect("vm://localhost", &ConnectionConfig::default()).unwrap();
//! let session = connection.create_session(AckMode::Auto).unwrap();
//! let consumer = session.create_consumer(&Destination::queue("orders"), None).unwrap();
//! connection.start().unwrap();
//!
//! broker.send("orders", BrokerMessage::text("hello")).unwrap();
//! let message = consumer.receive(Duration::from_millis(100)).unwrap().unwrap();
//! assert_eq!(message.body, mq_listener::broker::Body::Text("hello".into()));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use super::{
    BrokerError, BrokerMessage, Connection, Connector, Consumer, Selector, Session, SessionControl,
};
use crate::config::{AckMode, ConnectionConfig, Destination, RedeliveryPolicy};

/// Queue receiving messages whose redeliveries are exhausted.
pub const DEAD_LETTER_QUEUE: &str = "ActiveMQ.DLQ";

/// Longest single wait inside `receive`, so delayed redeliveries and
/// injected faults are noticed without a notification.
const WAIT_SLICE: Duration = Duration::from_millis(50);

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Endpoint {
    Queue(String),
    Subscription(u64),
    Durable(String, String),
}

struct Pending {
    message: BrokerMessage,
    available_at: Instant,
    /// Delay applied before this delivery, zero for a first delivery.
    redelivery_delay: Duration,
}

impl Pending {
    fn now(message: BrokerMessage) -> Self {
        Self {
            message,
            available_at: Instant::now(),
            redelivery_delay: Duration::ZERO,
        }
    }

    fn expired(&self, now_ms: i64) -> bool {
        self.message.expiration > 0 && self.message.expiration <= now_ms
    }
}

struct TopicSubscription {
    topic: String,
    connection: u64,
    no_local: bool,
    selector: Option<Selector>,
    pending: VecDeque<Pending>,
}

struct DurableSubscription {
    topic: String,
    no_local: bool,
    selector: Option<Selector>,
    active: Option<u64>,
    pending: VecDeque<Pending>,
}

struct ConnectionState {
    client_id: String,
    started: bool,
    closed: bool,
    redelivery_policy: RedeliveryPolicy,
}

struct Unacked {
    endpoint: Endpoint,
    message: BrokerMessage,
    redelivery_delay: Duration,
    policy: RedeliveryPolicy,
}

struct SessionState {
    connection: u64,
    ack_mode: AckMode,
    closed: bool,
    unacked: Vec<Unacked>,
    consumers: Vec<u64>,
}

struct ConsumerState {
    session: u64,
    endpoint: Endpoint,
    selector: Option<Selector>,
    exclusive: bool,
    closed: bool,
    policy: Option<RedeliveryPolicy>,
}

#[derive(Default)]
struct State {
    credentials: Option<(String, String)>,
    next_id: u64,
    next_message: u64,
    queues: HashMap<String, VecDeque<Pending>>,
    subscriptions: HashMap<u64, TopicSubscription>,
    durables: HashMap<(String, String), DurableSubscription>,
    connections: HashMap<u64, ConnectionState>,
    sessions: HashMap<u64, SessionState>,
    consumers: HashMap<u64, ConsumerState>,
    faults: VecDeque<BrokerError>,
    sessions_created: usize,
    consumers_created: usize,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn stamp(&mut self, mut message: BrokerMessage, destination: &Destination) -> BrokerMessage {
        self.next_message += 1;
        message.message_id = format!("ID:in-memory-{}", self.next_message);
        message.destination = Some(destination.uri());
        if message.timestamp == 0 {
            message.timestamp = now_millis();
        }
        message.redelivered = false;
        message.delivery_count = 1;
        message
    }

    fn enqueue(&mut self, queue: &str, message: BrokerMessage) {
        self.queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Pending::now(message));
    }

    fn publish(&mut self, topic: &str, message: BrokerMessage, from: Option<u64>) {
        let from_client = from
            .and_then(|id| self.connections.get(&id))
            .map(|c| c.client_id.clone());

        for sub in self.subscriptions.values_mut() {
            if sub.topic != topic || (sub.no_local && from == Some(sub.connection)) {
                continue;
            }
            if sub.selector.as_ref().map_or(true, |s| s.matches(&message)) {
                sub.pending.push_back(Pending::now(message.clone()));
            }
        }
        for ((client_id, _), sub) in self.durables.iter_mut() {
            if sub.topic != topic || (sub.no_local && from_client.as_ref() == Some(client_id)) {
                continue;
            }
            if sub.selector.as_ref().map_or(true, |s| s.matches(&message)) {
                sub.pending.push_back(Pending::now(message.clone()));
            }
        }
    }

    fn pending_mut(&mut self, endpoint: &Endpoint) -> Option<&mut VecDeque<Pending>> {
        match endpoint {
            Endpoint::Queue(name) => self.queues.get_mut(name),
            Endpoint::Subscription(id) => self.subscriptions.get_mut(id).map(|s| &mut s.pending),
            Endpoint::Durable(client_id, name) => self
                .durables
                .get_mut(&(client_id.clone(), name.clone()))
                .map(|s| &mut s.pending),
        }
    }

    fn check_session(&self, id: u64) -> Result<&SessionState, BrokerError> {
        let session = self.sessions.get(&id).ok_or(BrokerError::SessionClosed)?;
        if session.closed {
            return Err(BrokerError::SessionClosed);
        }
        match self.connections.get(&session.connection) {
            Some(connection) if !connection.closed => Ok(session),
            _ => Err(BrokerError::ConnectionClosed),
        }
    }

    fn check_consumer(&self, id: u64) -> Result<&ConsumerState, BrokerError> {
        let consumer = self.consumers.get(&id).ok_or(BrokerError::ConsumerClosed)?;
        if consumer.closed {
            return Err(BrokerError::ConsumerClosed);
        }
        self.check_session(consumer.session)?;
        Ok(consumer)
    }

    fn exclusive_owner(&self, queue: &str) -> Option<u64> {
        self.consumers
            .iter()
            .filter(|(_, c)| {
                !c.closed && c.exclusive && matches!(&c.endpoint, Endpoint::Queue(q) if q == queue)
            })
            .map(|(id, _)| *id)
            .min()
    }

    /// Take the next deliverable message for `consumer_id`, if any.
    fn take(&mut self, consumer_id: u64) -> Option<BrokerMessage> {
        let consumer = self.consumers.get(&consumer_id)?;
        let session = self.sessions.get(&consumer.session)?;
        let connection = self.connections.get(&session.connection)?;
        if !connection.started {
            return None;
        }

        let endpoint = consumer.endpoint.clone();
        let selector = consumer.selector.clone();
        if let Endpoint::Queue(name) = &endpoint {
            if self.exclusive_owner(name).is_some_and(|owner| owner != consumer_id) {
                return None;
            }
        }

        let now = Instant::now();
        let now_ms = now_millis();
        let pending = self.pending_mut(&endpoint)?;
        let before = pending.len();
        pending.retain(|p| !p.expired(now_ms));
        if pending.len() < before {
            debug!(dropped = before - pending.len(), "discarded expired messages");
        }
        let position = pending.iter().position(|p| {
            p.available_at <= now && selector.as_ref().map_or(true, |s| s.matches(&p.message))
        })?;
        let pending = pending.remove(position)?;
        self.track(consumer_id, endpoint, &pending);
        Some(pending.message)
    }

    /// Record a delivery that needs an explicit acknowledgement or commit.
    fn track(&mut self, consumer_id: u64, endpoint: Endpoint, delivered: &Pending) {
        let Some(consumer) = self.consumers.get(&consumer_id) else {
            return;
        };
        let session_id = consumer.session;
        let override_policy = consumer.policy.clone();
        let Some(session) = self.sessions.get(&session_id) else {
            return;
        };
        if !matches!(session.ack_mode, AckMode::Client | AckMode::Transacted) {
            return;
        }
        let policy = override_policy
            .or_else(|| {
                self.connections
                    .get(&session.connection)
                    .map(|c| c.redelivery_policy.clone())
            })
            .unwrap_or_default();
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.unacked.push(Unacked {
                endpoint,
                message: delivered.message.clone(),
                redelivery_delay: delivered.redelivery_delay,
                policy,
            });
        }
    }

    /// Put messages back for redelivery, or dead-letter them once the
    /// policy is exhausted. Original order is preserved.
    fn redeliver(&mut self, unacked: Vec<Unacked>) {
        let now = Instant::now();
        let mut requeue = Vec::new();
        for item in unacked {
            let mut message = item.message;
            message.redelivered = true;
            message.delivery_count += 1;
            let redeliveries = message.delivery_count.saturating_sub(1);
            if item.policy.exceeded(redeliveries) {
                warn!(
                    message_id = %message.message_id,
                    redeliveries,
                    "redelivery policy exhausted, moving message to {}",
                    DEAD_LETTER_QUEUE
                );
                self.enqueue(DEAD_LETTER_QUEUE, message);
                continue;
            }
            let delay = if redeliveries <= 1 {
                item.policy.delay_for(1)
            } else {
                item.policy.next_delay(item.redelivery_delay)
            };
            let Some(available_at) = now.checked_add(delay) else {
                warn!(
                    message_id = %message.message_id,
                    delay_secs = delay.as_secs(),
                    "redelivery delay out of range, moving message to {}",
                    DEAD_LETTER_QUEUE
                );
                self.enqueue(DEAD_LETTER_QUEUE, message);
                continue;
            };
            requeue.push((
                item.endpoint,
                Pending {
                    message,
                    available_at,
                    redelivery_delay: delay,
                },
            ));
        }
        for (endpoint, pending) in requeue.into_iter().rev() {
            if let Some(queue) = self.pending_mut(&endpoint) {
                queue.push_front(pending);
            }
        }
    }

    fn close_consumer(&mut self, id: u64) {
        let Some(consumer) = self.consumers.get_mut(&id) else {
            return;
        };
        if consumer.closed {
            return;
        }
        consumer.closed = true;
        match consumer.endpoint.clone() {
            Endpoint::Subscription(sub) => {
                self.subscriptions.remove(&sub);
            }
            Endpoint::Durable(client_id, name) => {
                if let Some(durable) = self.durables.get_mut(&(client_id, name)) {
                    if durable.active == Some(id) {
                        durable.active = None;
                    }
                }
            }
            Endpoint::Queue(_) => {}
        }
    }

    fn close_session(&mut self, id: u64) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if session.closed {
            return;
        }
        session.closed = true;
        let unacked = std::mem::take(&mut session.unacked);
        let consumers = session.consumers.clone();
        for consumer in consumers {
            self.close_consumer(consumer);
        }
        if !unacked.is_empty() {
            debug!(session = id, count = unacked.len(), "recovering unacknowledged messages");
        }
        self.redeliver(unacked);
    }

    fn close_connection(&mut self, id: u64) {
        let Some(connection) = self.connections.get_mut(&id) else {
            return;
        };
        connection.closed = true;
        connection.started = false;
        let sessions: Vec<u64> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.connection == id)
            .map(|(sid, _)| *sid)
            .collect();
        for session in sessions {
            self.close_session(session);
        }
    }
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
}

/// In-memory broker. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create a broker that accepts any credentials.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                wake: Condvar::new(),
            }),
        }
    }

    /// Require these credentials on every connection.
    pub fn with_credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        if let Ok(mut state) = self.shared.state.lock() {
            state.credentials = Some((username.into(), password.into()));
        }
        self
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, State>, BrokerError> {
        self.shared
            .state
            .lock()
            .map_err(|_| BrokerError::LockPoisoned(operation))
    }

    fn notify(&self) {
        self.shared.wake.notify_all();
    }

    /// Send a message to a queue. Returns the assigned message id.
    pub fn send(&self, queue: &str, message: BrokerMessage) -> Result<String, BrokerError> {
        if queue.trim().is_empty() {
            return Err(BrokerError::InvalidDestination("queue name is empty".into()));
        }
        let mut state = self.lock("send")?;
        let message = state.stamp(message, &Destination::queue(queue));
        let id = message.message_id.clone();
        state.enqueue(queue, message);
        drop(state);
        self.notify();
        Ok(id)
    }

    /// Publish a message to a topic. Returns the assigned message id.
    pub fn publish(&self, topic: &str, message: BrokerMessage) -> Result<String, BrokerError> {
        self.publish_from(topic, message, None)
    }

    fn publish_from(
        &self,
        topic: &str,
        message: BrokerMessage,
        connection: Option<u64>,
    ) -> Result<String, BrokerError> {
        if topic.trim().is_empty() {
            return Err(BrokerError::InvalidDestination("topic name is empty".into()));
        }
        let mut state = self.lock("publish")?;
        let message = state.stamp(message, &Destination::topic(topic));
        let id = message.message_id.clone();
        state.publish(topic, message, connection);
        drop(state);
        self.notify();
        Ok(id)
    }

    /// Make the next `receive` on any consumer fail with `error`.
    pub fn fail_next_receive(&self, error: BrokerError) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.faults.push_back(error);
        }
        self.notify();
    }

    /// Total sessions ever created.
    pub fn sessions_created(&self) -> usize {
        self.shared.state.lock().map(|s| s.sessions_created).unwrap_or_default()
    }

    /// Total consumers ever created.
    pub fn consumers_created(&self) -> usize {
        self.shared.state.lock().map(|s| s.consumers_created).unwrap_or_default()
    }

    pub fn open_sessions(&self) -> usize {
        self.shared
            .state
            .lock()
            .map(|s| s.sessions.values().filter(|x| !x.closed).count())
            .unwrap_or_default()
    }

    pub fn open_consumers(&self) -> usize {
        self.shared
            .state
            .lock()
            .map(|s| s.consumers.values().filter(|x| !x.closed).count())
            .unwrap_or_default()
    }

    /// Messages waiting on a queue, including delayed redeliveries.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .map(|s| s.queues.get(queue).map_or(0, VecDeque::len))
            .unwrap_or_default()
    }

    /// Messages retained for a durable subscription.
    pub fn durable_len(&self, client_id: &str, name: &str) -> usize {
        self.shared
            .state
            .lock()
            .map(|s| {
                s.durables
                    .get(&(client_id.to_string(), name.to_string()))
                    .map_or(0, |d| d.pending.len())
            })
            .unwrap_or_default()
    }

    /// Messages delivered but not yet acknowledged or committed.
    pub fn unacknowledged(&self) -> usize {
        self.shared
            .state
            .lock()
            .map(|s| s.sessions.values().map(|x| x.unacked.len()).sum())
            .unwrap_or_default()
    }

    /// Messages moved to the dead-letter queue.
    pub fn dead_letters(&self) -> Vec<BrokerMessage> {
        self.shared
            .state
            .lock()
            .map(|s| {
                s.queues
                    .get(DEAD_LETTER_QUEUE)
                    .map(|q| q.iter().map(|p| p.message.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

impl Connector for InMemoryBroker {
    type Connection = InMemoryConnection;

    fn connect(&self, url: &str, config: &ConnectionConfig) -> Result<InMemoryConnection, BrokerError> {
        let scheme = url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .ok_or_else(|| BrokerError::ConnectionFailed(format!("malformed broker url '{}'", url)))?;
        match scheme.as_str() {
            "vm" | "tcp" | "nio" => {}
            "ssl" => {
                if config.secure_socket.is_none() {
                    return Err(BrokerError::Tls(format!(
                        "'{}' requires secure socket settings",
                        url
                    )));
                }
            }
            other => {
                return Err(BrokerError::ConnectionFailed(format!(
                    "unsupported transport '{}'",
                    other
                )))
            }
        }

        let mut state = self.lock("connect")?;
        if let Some((username, password)) = &state.credentials {
            let supplied = (config.username.as_ref(), config.password.as_ref());
            if supplied != (Some(username), Some(password)) {
                return Err(BrokerError::AuthenticationFailed(format!(
                    "user '{}' rejected",
                    config.username.as_deref().unwrap_or_default()
                )));
            }
        }
        if state
            .connections
            .values()
            .any(|c| !c.closed && c.client_id == config.client_id)
        {
            return Err(BrokerError::ConnectionFailed(format!(
                "client id '{}' is already connected",
                config.client_id
            )));
        }

        let id = state.next_id();
        state.connections.insert(
            id,
            ConnectionState {
                client_id: config.client_id.clone(),
                started: false,
                closed: false,
                redelivery_policy: config.redelivery_policy.clone().unwrap_or_default(),
            },
        );
        debug!(connection = id, client_id = %config.client_id, url, "in-memory connection opened");
        Ok(InMemoryConnection {
            broker: self.clone(),
            id,
        })
    }
}

/// A connection to an [`InMemoryBroker`].
pub struct InMemoryConnection {
    broker: InMemoryBroker,
    id: u64,
}

impl InMemoryConnection {
    /// Publish to a topic from this connection, so `no_local`
    /// subscriptions on it skip the message.
    pub fn publish(&self, topic: &str, message: BrokerMessage) -> Result<String, BrokerError> {
        self.broker.publish_from(topic, message, Some(self.id))
    }

    pub fn client_id(&self) -> Option<String> {
        self.broker
            .shared
            .state
            .lock()
            .ok()
            .and_then(|s| s.connections.get(&self.id).map(|c| c.client_id.clone()))
    }
}

impl Connection for InMemoryConnection {
    type Session = InMemorySession;

    fn create_session(&self, ack_mode: AckMode) -> Result<InMemorySession, BrokerError> {
        let mut state = self.broker.lock("create_session")?;
        match state.connections.get(&self.id) {
            Some(connection) if !connection.closed => {}
            _ => return Err(BrokerError::ConnectionClosed),
        }
        let id = state.next_id();
        state.sessions.insert(
            id,
            SessionState {
                connection: self.id,
                ack_mode,
                closed: false,
                unacked: Vec::new(),
                consumers: Vec::new(),
            },
        );
        state.sessions_created += 1;
        Ok(InMemorySession {
            broker: self.broker.clone(),
            id,
            ack_mode,
        })
    }

    fn start(&self) -> Result<(), BrokerError> {
        let mut state = self.broker.lock("start")?;
        let connection = state
            .connections
            .get_mut(&self.id)
            .filter(|c| !c.closed)
            .ok_or(BrokerError::ConnectionClosed)?;
        connection.started = true;
        drop(state);
        self.broker.notify();
        Ok(())
    }

    fn stop(&self) -> Result<(), BrokerError> {
        let mut state = self.broker.lock("stop")?;
        if let Some(connection) = state.connections.get_mut(&self.id) {
            connection.started = false;
        }
        Ok(())
    }

    fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.broker.lock("close")?;
        state.close_connection(self.id);
        drop(state);
        self.broker.notify();
        Ok(())
    }
}

/// A session on an [`InMemoryConnection`].
pub struct InMemorySession {
    broker: InMemoryBroker,
    id: u64,
    ack_mode: AckMode,
}

impl InMemorySession {
    fn register(
        &self,
        state: &mut State,
        endpoint: Endpoint,
        selector: Option<Selector>,
        exclusive: bool,
    ) -> Result<InMemoryConsumer, BrokerError> {
        let id = match &endpoint {
            Endpoint::Subscription(id) => *id,
            _ => state.next_id(),
        };
        state.consumers.insert(
            id,
            ConsumerState {
                session: self.id,
                endpoint,
                selector,
                exclusive,
                closed: false,
                policy: None,
            },
        );
        if let Some(session) = state.sessions.get_mut(&self.id) {
            session.consumers.push(id);
        }
        state.consumers_created += 1;
        Ok(InMemoryConsumer {
            broker: self.broker.clone(),
            id,
        })
    }
}

fn parse_selector(selector: Option<&str>) -> Result<Option<Selector>, BrokerError> {
    selector.map(Selector::parse).transpose()
}

impl SessionControl for InMemorySession {
    fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    fn commit(&self) -> Result<(), BrokerError> {
        if self.ack_mode != AckMode::Transacted {
            return Err(BrokerError::IllegalState(format!(
                "commit on a {} session",
                self.ack_mode
            )));
        }
        let mut state = self.broker.lock("commit")?;
        state.check_session(self.id)?;
        if let Some(session) = state.sessions.get_mut(&self.id) {
            session.unacked.clear();
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), BrokerError> {
        if self.ack_mode != AckMode::Transacted {
            return Err(BrokerError::IllegalState(format!(
                "rollback on a {} session",
                self.ack_mode
            )));
        }
        let mut state = self.broker.lock("rollback")?;
        state.check_session(self.id)?;
        let unacked = state
            .sessions
            .get_mut(&self.id)
            .map(|s| std::mem::take(&mut s.unacked))
            .unwrap_or_default();
        state.redeliver(unacked);
        drop(state);
        self.broker.notify();
        Ok(())
    }

    fn acknowledge(&self, message_id: &str) -> Result<(), BrokerError> {
        if self.ack_mode != AckMode::Client {
            return Err(BrokerError::IllegalState(format!(
                "acknowledge on a {} session",
                self.ack_mode
            )));
        }
        let mut state = self.broker.lock("acknowledge")?;
        state.check_session(self.id)?;
        if let Some(session) = state.sessions.get_mut(&self.id) {
            if let Some(position) = session
                .unacked
                .iter()
                .position(|u| u.message.message_id == message_id)
            {
                session.unacked.drain(..=position);
            }
        }
        Ok(())
    }
}

impl Session for InMemorySession {
    type Consumer = InMemoryConsumer;

    fn create_consumer(
        &self,
        destination: &Destination,
        selector: Option<&str>,
    ) -> Result<InMemoryConsumer, BrokerError> {
        if destination.name().trim().is_empty() {
            return Err(BrokerError::InvalidDestination("destination name is empty".into()));
        }
        let selector = parse_selector(selector)?;
        let mut state = self.broker.lock("create_consumer")?;
        let connection = state.check_session(self.id)?.connection;
        debug!(
            session = self.id,
            destination = %destination.physical_name(),
            "creating consumer"
        );

        match destination {
            Destination::Queue { name, exclusive } => {
                state.queues.entry(name.clone()).or_default();
                self.register(&mut state, Endpoint::Queue(name.clone()), selector, *exclusive)
            }
            Destination::Topic {
                name,
                exclusive,
                no_local,
                ..
            } => {
                let id = state.next_id();
                state.subscriptions.insert(
                    id,
                    TopicSubscription {
                        topic: name.clone(),
                        connection,
                        no_local: *no_local,
                        selector,
                        pending: VecDeque::new(),
                    },
                );
                self.register(&mut state, Endpoint::Subscription(id), None, *exclusive)
            }
        }
    }

    fn create_durable_subscriber(
        &self,
        destination: &Destination,
        name: &str,
        selector: Option<&str>,
    ) -> Result<InMemoryConsumer, BrokerError> {
        let Destination::Topic {
            name: topic,
            no_local,
            exclusive,
            ..
        } = destination
        else {
            return Err(BrokerError::InvalidDestination(format!(
                "durable subscriber '{}' needs a topic, got {}",
                name, destination
            )));
        };
        if name.trim().is_empty() {
            return Err(BrokerError::IllegalState("durable subscriber name is empty".into()));
        }
        let parsed = parse_selector(selector)?;
        let mut state = self.broker.lock("create_durable_subscriber")?;
        let connection = state.check_session(self.id)?.connection;
        let client_id = state
            .connections
            .get(&connection)
            .map(|c| c.client_id.clone())
            .ok_or(BrokerError::ConnectionClosed)?;
        let key = (client_id.clone(), name.to_string());
        debug!(
            session = self.id,
            destination = %destination.physical_name(),
            subscription = name,
            "creating durable subscriber"
        );

        let reuse = match state.durables.get(&key) {
            Some(existing) if existing.active.is_some() => {
                return Err(BrokerError::IllegalState(format!(
                    "durable subscriber '{}' is already active",
                    name
                )))
            }
            Some(existing) => {
                existing.topic == *topic
                    && existing.selector.as_ref().map(Selector::as_str) == selector
                    && existing.no_local == *no_local
            }
            None => false,
        };
        if !reuse {
            state.durables.insert(
                key.clone(),
                DurableSubscription {
                    topic: topic.clone(),
                    no_local: *no_local,
                    selector: parsed,
                    active: None,
                    pending: VecDeque::new(),
                },
            );
        }

        let consumer = self.register(
            &mut state,
            Endpoint::Durable(client_id, name.to_string()),
            None,
            *exclusive,
        )?;
        if let Some(durable) = state.durables.get_mut(&key) {
            durable.active = Some(consumer.id);
        }
        Ok(consumer)
    }

    fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.broker.lock("close_session")?;
        state.close_session(self.id);
        drop(state);
        self.broker.notify();
        Ok(())
    }
}

/// A consumer created by an [`InMemorySession`].
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    id: u64,
}

impl Consumer for InMemoryConsumer {
    fn receive(&self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.broker.lock("receive")?;
        loop {
            state.check_consumer(self.id)?;
            if let Some(fault) = state.faults.pop_front() {
                return Err(fault);
            }
            if let Some(message) = state.take(self.id) {
                return Ok(Some(message));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = (deadline - now).min(WAIT_SLICE);
            state = self
                .broker
                .shared
                .wake
                .wait_timeout(state, wait)
                .map_err(|_| BrokerError::LockPoisoned("receive"))?
                .0;
        }
    }

    fn set_redelivery_policy(&self, policy: &RedeliveryPolicy) -> Result<(), BrokerError> {
        let mut state = self.broker.lock("set_redelivery_policy")?;
        state.check_consumer(self.id)?;
        if let Some(consumer) = state.consumers.get_mut(&self.id) {
            consumer.policy = Some(policy.clone());
        }
        Ok(())
    }

    fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.broker.lock("close_consumer")?;
        state.close_consumer(self.id);
        drop(state);
        self.broker.notify();
        Ok(())
    }
}
