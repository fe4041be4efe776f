//! Selectors, topics and no_local delivery.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mq_listener::broker::BrokerMessage;
use mq_listener::config::SubscriptionConfig;
use mq_listener::{ErrorKind, Service};

use crate::support::{count, harness, queue, seen, text, topic, wait_until, Seen};

fn recording(config: SubscriptionConfig, seen: &Seen<String>) -> Service {
    let seen = Arc::clone(seen);
    Service::new().with_config(config).on_message(move |message| {
        seen.lock().unwrap().push(text(message));
        Ok(())
    })
}

#[test]
fn selector_filters_queue_messages() {
    let h = harness();
    let handled = seen();
    let service = recording(queue("tickets").with_selector("priority = 'high'"), &handled);
    h.listener.attach(&service).unwrap();
    h.listener.start().unwrap();

    for (body, priority) in [("a", "low"), ("b", "high"), ("c", "medium")] {
        h.broker
            .send("tickets", BrokerMessage::text(body).with_property("priority", priority))
            .unwrap();
    }

    assert!(wait_until(|| count(&handled) == 1));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(*handled.lock().unwrap(), vec!["b".to_string()]);
    assert_eq!(h.broker.queue_len("tickets"), 2);
    h.listener.graceful_stop();
}

#[test]
fn invalid_selector_fails_attach_without_leaking_a_session() {
    let h = harness();
    let service = recording(queue("tickets").with_selector("priority = = 'high'"), &seen());

    let err = h.listener.attach(&service).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Consumer);
    assert!(h.listener.attached().is_empty());
    assert_eq!(h.broker.open_sessions(), 0);
}

#[test]
fn topics_fan_out_to_every_subscription() {
    let h = harness();
    let first = seen();
    let second = seen();
    h.listener.attach(&recording(topic("news"), &first)).unwrap();
    h.listener.attach(&recording(topic("news"), &second)).unwrap();
    h.listener.start().unwrap();

    h.broker.publish("news", BrokerMessage::text("extra")).unwrap();
    assert!(wait_until(|| count(&first) == 1 && count(&second) == 1));
    h.listener.graceful_stop();
}

#[test]
fn no_local_skips_messages_from_the_same_connection() {
    let h = harness();
    let local = seen();
    let everything = seen();
    h.listener.attach(&recording(topic("chat").no_local(), &local)).unwrap();
    h.listener.attach(&recording(topic("chat"), &everything)).unwrap();
    h.listener.start().unwrap();

    h.listener
        .with_connection(|c| c.publish("chat", BrokerMessage::text("mine")))
        .unwrap()
        .unwrap();
    h.broker.publish("chat", BrokerMessage::text("theirs")).unwrap();

    assert!(wait_until(|| count(&everything) == 2 && count(&local) == 1));
    assert_eq!(*local.lock().unwrap(), vec!["theirs".to_string()]);
    h.listener.graceful_stop();
}
