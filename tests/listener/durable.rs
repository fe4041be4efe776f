//! Durable topic subscriptions keep messages while detached.

use std::sync::Arc;

use mq_listener::broker::BrokerMessage;
use mq_listener::Service;

use crate::support::{connection, count, harness_with, seen, text, topic, wait_until, Seen};

fn subscriber(seen: &Seen<String>) -> Service {
    let seen = Arc::clone(seen);
    Service::new()
        .with_config(topic("prices").durable("price-feed"))
        .on_message(move |message| {
            seen.lock().unwrap().push(text(message));
            Ok(())
        })
}

#[test]
fn messages_published_while_detached_are_retained() {
    let h = harness_with(connection().with_client_id("durable-client"), |l| l);
    let handled = seen();
    let first = subscriber(&handled);
    h.listener.attach(&first).unwrap();
    h.listener.start().unwrap();

    h.broker.publish("prices", BrokerMessage::text("100")).unwrap();
    assert!(wait_until(|| count(&handled) == 1));
    h.listener.detach(&first).unwrap();

    h.broker.publish("prices", BrokerMessage::text("101")).unwrap();
    h.broker.publish("prices", BrokerMessage::text("102")).unwrap();
    assert_eq!(h.broker.durable_len("durable-client", "price-feed"), 2);

    let second = subscriber(&handled);
    h.listener.attach(&second).unwrap();
    assert!(wait_until(|| count(&handled) == 3));
    assert_eq!(
        *handled.lock().unwrap(),
        vec!["100".to_string(), "101".to_string(), "102".to_string()]
    );
    h.listener.graceful_stop();
}
