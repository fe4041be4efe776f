//! Handler and transport failures are routed, never fatal to the listener.

use std::sync::Arc;

use mq_listener::broker::BrokerError;
use mq_listener::{ErrorKind, HandlerError, Service};

use crate::support::{count, harness, harness_with, connection, queue, seen, text, wait_until};

#[test]
fn handler_errors_reach_on_error_and_polling_continues() {
    let h = harness();
    let handled = seen();
    let errors = seen();

    let service = {
        let (handled, errors) = (Arc::clone(&handled), Arc::clone(&errors));
        Service::new()
            .with_config(queue("mixed"))
            .on_message(move |message| {
                let body = text(message);
                if body == "bad" {
                    return Err(HandlerError::Rejected(body));
                }
                handled.lock().unwrap().push(body);
                Ok(())
            })
            .on_error(move |err| {
                errors.lock().unwrap().push((err.kind(), err.to_string()));
                Ok(())
            })
    };
    h.listener.attach(&service).unwrap();
    h.listener.start().unwrap();
    h.send("mixed", "bad");
    h.send("mixed", "good");

    assert!(wait_until(|| count(&handled) == 1 && count(&errors) == 1));
    let (kind, message) = errors.lock().unwrap()[0].clone();
    assert_eq!(kind, ErrorKind::Handler);
    assert!(message.contains("rejected: bad"));
    assert!(h.failures().is_empty());

    let stats = h.listener.receiver_stats(service.id()).unwrap();
    assert_eq!((stats.handled, stats.failed), (1, 1));
    h.listener.graceful_stop();
}

#[test]
fn failures_without_on_error_go_to_the_sink() {
    let h = harness();
    let service = Service::new()
        .with_config(queue("unhandled"))
        .on_message(|_| Err(HandlerError::Rejected("no thanks".into())));
    h.listener.attach(&service).unwrap();
    h.listener.start().unwrap();
    h.send("unhandled", "x");
    h.send("unhandled", "y");

    assert!(wait_until(|| h.failures().len() == 2));
    assert!(h.failures()[0].starts_with("queue://unhandled: "));
    assert!(h.listener.is_consuming(service.id()));
    h.listener.graceful_stop();
}

#[test]
fn failing_error_handler_is_reported_to_the_sink() {
    let h = harness();
    let service = Service::new()
        .with_config(queue("double"))
        .on_message(|_| Err(HandlerError::Rejected("first".into())))
        .on_error(|_| Err(HandlerError::Rejected("second".into())));
    h.listener.attach(&service).unwrap();
    h.listener.start().unwrap();
    h.send("double", "x");

    assert!(wait_until(|| h.failures().len() == 1));
    assert!(h.failures()[0].contains("second"));
    h.listener.graceful_stop();
}

#[test]
fn panicking_handler_does_not_stop_the_subscription() {
    let h = harness();
    let handled = seen();
    let service = {
        let handled = Arc::clone(&handled);
        Service::new()
            .with_config(queue("fragile"))
            .on_message(move |message| {
                let body = text(message);
                if body == "boom" {
                    panic!("handler blew up");
                }
                handled.lock().unwrap().push(body);
                Ok(())
            })
    };
    h.listener.attach(&service).unwrap();
    h.listener.start().unwrap();
    h.send("fragile", "boom");
    h.send("fragile", "fine");

    assert!(wait_until(|| count(&handled) == 1));
    assert!(wait_until(|| h
        .failures()
        .iter()
        .any(|line| line.contains("handler panicked: handler blew up"))));
    h.listener.graceful_stop();
}

#[test]
fn transient_receive_errors_are_reported_and_polling_continues() {
    let h = harness();
    let handled = seen();
    let errors = seen();
    let service = {
        let (handled, errors) = (Arc::clone(&handled), Arc::clone(&errors));
        Service::new()
            .with_config(queue("flaky"))
            .on_message(move |message| {
                handled.lock().unwrap().push(text(message));
                Ok(())
            })
            .on_error(move |err| {
                errors.lock().unwrap().push(err.broker_error().cloned());
                Ok(())
            })
    };
    h.listener.attach(&service).unwrap();
    h.broker.fail_next_receive(BrokerError::Io("connection reset".into()));
    h.listener.start().unwrap();

    assert!(wait_until(|| count(&errors) == 1));
    assert_eq!(
        errors.lock().unwrap()[0],
        Some(BrokerError::Io("connection reset".into()))
    );

    h.send("flaky", "after");
    assert!(wait_until(|| count(&handled) == 1));
    assert!(h.listener.is_consuming(service.id()));
    h.listener.graceful_stop();
}

#[test]
fn fatal_receive_error_cancels_the_subscription() {
    let h = harness();
    let service = Service::new().with_config(queue("doomed")).on_message(|_| Ok(()));
    h.listener.attach(&service).unwrap();
    h.broker.fail_next_receive(BrokerError::ConsumerClosed);
    h.listener.start().unwrap();

    assert!(wait_until(|| !h.listener.is_consuming(service.id())));
    assert!(wait_until(|| h.failures().len() == 1));
    assert!(h.failures()[0].contains("failed to fetch the message"));
    assert_eq!(h.listener.receiver_stats(service.id()).unwrap().errors, 1);
    h.listener.graceful_stop();
}

#[test]
fn repeated_receive_errors_cancel_the_subscription() {
    let h = harness_with(connection(), |l| l.with_max_consecutive_failures(2));
    let service = Service::new().with_config(queue("unstable")).on_message(|_| Ok(()));
    h.listener.attach(&service).unwrap();
    h.broker.fail_next_receive(BrokerError::Io("one".into()));
    h.broker.fail_next_receive(BrokerError::Io("two".into()));
    h.listener.start().unwrap();

    assert!(wait_until(|| !h.listener.is_consuming(service.id())));
    assert_eq!(h.failures().len(), 2);
    h.listener.graceful_stop();
}
