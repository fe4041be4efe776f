//! Attach/start/detach ordering.

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mq_listener::config::{load_settings, ConnectionConfig};
use mq_listener::{ErrorKind, InMemoryBroker, Listener, ListenerError, ListenerState, Service};

use crate::support::{count, harness, queue, seen, text, wait_until, Seen, URL};

fn recording(queue_name: &str, seen: &Seen<String>) -> Service {
    let seen = Arc::clone(seen);
    Service::new()
        .with_config(queue(queue_name))
        .on_message(move |message| {
            seen.lock().unwrap().push(text(message));
            Ok(())
        })
}

#[test]
fn attach_before_start_defers_consuming() {
    let h = harness();
    let handled = seen();
    let service = recording("orders", &handled);

    h.listener.attach(&service).unwrap();
    h.send("orders", "first");
    thread::sleep(Duration::from_millis(100));
    assert_eq!(count(&handled), 0);
    assert!(!h.listener.is_consuming(service.id()));

    h.listener.start().unwrap();
    assert!(wait_until(|| count(&handled) == 1));
    assert!(h.listener.is_consuming(service.id()));
    h.listener.graceful_stop();
}

#[test]
fn attach_after_start_consumes_immediately() {
    let h = harness();
    h.listener.start().unwrap();

    let handled = seen();
    let service = recording("late", &handled);
    h.listener.attach(&service).unwrap();
    h.send("late", "hello");

    assert!(wait_until(|| count(&handled) == 1));
    assert_eq!(*handled.lock().unwrap(), vec!["hello".to_string()]);
    h.listener.graceful_stop();
    assert_eq!(h.listener.state(), ListenerState::Stopped);
}

#[test]
fn detach_stops_only_that_subscription() {
    let h = harness();
    let a_seen = seen();
    let b_seen = seen();
    let a = recording("a", &a_seen);
    let b = recording("b", &b_seen);
    h.listener.attach(&a).unwrap();
    h.listener.attach(&b).unwrap();
    h.listener.start().unwrap();

    h.send("a", "1");
    assert!(wait_until(|| count(&a_seen) == 1));

    let stats = h.listener.detach(&a).unwrap();
    assert_eq!(stats.handled, 1);
    assert_eq!(h.listener.attached(), vec![b.id()]);
    assert_eq!(h.broker.open_sessions(), 1);

    h.send("a", "2");
    h.send("b", "3");
    assert!(wait_until(|| count(&b_seen) == 1));
    assert_eq!(count(&a_seen), 1);
    assert_eq!(h.broker.queue_len("a"), 1);

    assert!(matches!(h.listener.detach(&a), Err(ListenerError::NotAttached(id)) if id == a.id()));
    h.listener.graceful_stop();
}

#[test]
fn init_surfaces_connection_failures() {
    let listener = Listener::new(InMemoryBroker::new());
    let err = listener.init("http://localhost", ConnectionConfig::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(listener.state(), ListenerState::Created);

    let listener = Listener::new(InMemoryBroker::new().with_credentials("admin", "secret"));
    let err = listener
        .init(URL, ConnectionConfig::new().with_credentials("admin", "wrong"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);

    let err = listener.init("ssl://localhost:61617", ConnectionConfig::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);

    listener
        .init(URL, ConnectionConfig::new().with_credentials("admin", "secret"))
        .unwrap();
    assert_eq!(listener.state(), ListenerState::Initialized);
}

#[test]
fn init_from_settings_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        "url = \"vm://localhost\"\n\n[connection]\nclient_id = \"settings-client\"\nusername = \"admin\"\npassword = \"secret\""
    )
    .unwrap();
    let settings = load_settings(Some(file.path())).unwrap();

    let broker = InMemoryBroker::new().with_credentials("admin", "secret");
    let listener = Listener::new(broker);
    listener.init_from(&settings).unwrap();
    assert_eq!(
        listener.with_connection(|c| c.client_id()).flatten().as_deref(),
        Some("settings-client")
    );
}
