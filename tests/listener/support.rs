//! Shared fixtures: fast subscription configs and a listener wired to an
//! in-memory broker with a recording failure sink.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mq_listener::broker::BrokerMessage;
use mq_listener::config::{ConnectionConfig, RedeliveryPolicy, SubscriptionConfig};
use mq_listener::listener::LogSink;
use mq_listener::{InMemoryBroker, Listener, Message};

pub const URL: &str = "vm://localhost";
pub const POLL: Duration = Duration::from_millis(10);
pub const RECEIVE: Duration = Duration::from_millis(20);
pub const WAIT: Duration = Duration::from_secs(3);

pub fn queue(name: &str) -> SubscriptionConfig {
    SubscriptionConfig::queue(name)
        .with_polling_interval(POLL)
        .with_receive_timeout(RECEIVE)
}

pub fn topic(name: &str) -> SubscriptionConfig {
    SubscriptionConfig::topic(name)
        .with_polling_interval(POLL)
        .with_receive_timeout(RECEIVE)
}

/// Connection settings with zero redelivery delay.
pub fn connection() -> ConnectionConfig {
    ConnectionConfig::new().with_redelivery_policy(RedeliveryPolicy::immediate())
}

pub struct Harness {
    pub broker: InMemoryBroker,
    pub listener: Listener<InMemoryBroker>,
    pub failures: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn send(&self, queue: &str, text: &str) {
        self.broker.send(queue, BrokerMessage::text(text)).unwrap();
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }
}

/// An initialized (not started) listener.
pub fn harness() -> Harness {
    harness_with(connection(), |listener| listener)
}

/// Surface listener logs in test output (`cargo test -- --nocapture`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn harness_with(
    config: ConnectionConfig,
    customize: impl FnOnce(Listener<InMemoryBroker>) -> Listener<InMemoryBroker>,
) -> Harness {
    init_tracing();
    let broker = InMemoryBroker::new();
    let failures = Arc::new(Mutex::new(Vec::new()));
    let listener = customize(
        Listener::new(broker.clone()).with_failure_sink(LogSink::with_buffer(Arc::clone(&failures))),
    );
    listener.init(URL, config).unwrap();
    Harness {
        broker,
        listener,
        failures,
    }
}

pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn text(message: &Message) -> String {
    message.payload_str().unwrap_or_default().to_string()
}

pub type Seen<T> = Arc<Mutex<Vec<T>>>;

pub fn seen<T>() -> Seen<T> {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn count<T>(seen: &Seen<T>) -> usize {
    seen.lock().unwrap().len()
}
