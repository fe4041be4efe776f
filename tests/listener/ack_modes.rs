//! AUTO, DUPS_OK, CLIENT and TRANSACTED acknowledgement through the caller.

use std::sync::Arc;

use mq_listener::broker::BrokerError;
use mq_listener::config::{AckMode, RedeliveryPolicy};
use mq_listener::{HandlerError, Service};

use crate::support::{count, harness, harness_with, connection, queue, seen, text, wait_until};

#[test]
fn auto_mode_acknowledges_on_receipt() {
    let h = harness();
    let outcomes = seen();

    let service = {
        let outcomes = Arc::clone(&outcomes);
        Service::new()
            .with_config(queue("auto"))
            .on_message_with_caller(move |message, caller| {
                outcomes.lock().unwrap().push(caller.acknowledge(message));
                Ok(())
            })
    };
    h.listener.attach(&service).unwrap();
    h.listener.start().unwrap();
    h.send("auto", "a");

    assert!(wait_until(|| count(&outcomes) == 1));
    assert!(matches!(outcomes.lock().unwrap()[0], Err(BrokerError::IllegalState(_))));
    assert_eq!(h.broker.unacknowledged(), 0);
    h.listener.graceful_stop();
    assert_eq!(h.broker.queue_len("auto"), 0);
}

#[test]
fn dups_ok_mode_acknowledges_on_receipt() {
    let h = harness();
    let outcomes = seen();

    let service = {
        let outcomes = Arc::clone(&outcomes);
        Service::new()
            .with_config(queue("lazy").with_ack_mode(AckMode::DupsOk))
            .on_message_with_caller(move |message, caller| {
                assert_eq!(caller.ack_mode(), AckMode::DupsOk);
                outcomes.lock().unwrap().push((
                    text(message),
                    vec![caller.acknowledge(message), caller.commit(), caller.rollback()],
                ));
                Ok(())
            })
    };
    h.listener.attach(&service).unwrap();
    h.listener.start().unwrap();
    h.send("lazy", "a");
    h.send("lazy", "b");

    assert!(wait_until(|| count(&outcomes) == 2));
    for (_, results) in outcomes.lock().unwrap().iter() {
        assert_eq!(results.len(), 3);
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(BrokerError::IllegalState(_)))));
    }
    let bodies: Vec<String> = outcomes.lock().unwrap().iter().map(|(b, _)| b.clone()).collect();
    assert_eq!(bodies, vec!["a", "b"]);
    assert_eq!(h.broker.unacknowledged(), 0);
    h.listener.graceful_stop();
    assert_eq!(h.broker.queue_len("lazy"), 0);
    assert!(h.failures().is_empty());
}

#[test]
fn client_acknowledge_covers_earlier_messages() {
    let h = harness();
    let handled = seen();

    let service = {
        let handled = Arc::clone(&handled);
        Service::new()
            .with_config(queue("client").with_ack_mode(AckMode::Client))
            .on_message_with_caller(move |message, caller| {
                let body = text(message);
                if body == "2" {
                    caller.acknowledge(message)?;
                }
                handled.lock().unwrap().push(body);
                Ok(())
            })
    };
    h.listener.attach(&service).unwrap();
    h.listener.start().unwrap();
    for body in ["1", "2", "3"] {
        h.send("client", body);
    }

    assert!(wait_until(|| count(&handled) == 3));
    assert!(wait_until(|| h.broker.unacknowledged() == 1));

    // Closing the session recovers the unacknowledged message.
    h.listener.graceful_stop();
    assert_eq!(h.broker.queue_len("client"), 1);
}

#[test]
fn transacted_rollback_redelivers_until_commit() {
    let h = harness();
    let deliveries = seen();

    let service = {
        let deliveries = Arc::clone(&deliveries);
        Service::new()
            .with_config(queue("tx").with_ack_mode(AckMode::Transacted))
            .on_message_with_caller(move |message, caller| {
                deliveries.lock().unwrap().push((text(message), message.redelivered));
                if message.redelivered {
                    caller.commit()?;
                } else {
                    caller.rollback()?;
                }
                Ok(())
            })
    };
    h.listener.attach(&service).unwrap();
    h.listener.start().unwrap();
    h.send("tx", "order-1");

    assert!(wait_until(|| count(&deliveries) == 2));
    assert_eq!(
        *deliveries.lock().unwrap(),
        vec![("order-1".to_string(), false), ("order-1".to_string(), true)]
    );
    assert!(wait_until(|| h.broker.unacknowledged() == 0));
    h.listener.graceful_stop();
    assert_eq!(h.broker.queue_len("tx"), 0);
}

#[test]
fn exhausted_redeliveries_go_to_the_dead_letter_queue() {
    let policy = RedeliveryPolicy::immediate().with_maximum_redeliveries(1);
    let h = harness_with(connection().with_redelivery_policy(policy), |l| l);
    let attempts = seen();

    let service = {
        let attempts = Arc::clone(&attempts);
        Service::new()
            .with_config(queue("poison").with_ack_mode(AckMode::Transacted))
            .on_message_with_caller(move |message, caller| {
                attempts.lock().unwrap().push(message.message_id.clone());
                caller.rollback()?;
                Err(HandlerError::Rejected("cannot process".into()))
            })
    };
    h.listener.attach(&service).unwrap();
    h.listener.start().unwrap();
    h.send("poison", "bad");

    assert!(wait_until(|| h.broker.dead_letters().len() == 1));
    assert_eq!(count(&attempts), 2);
    h.listener.graceful_stop();
}

#[test]
fn subscription_policy_overrides_connection_policy() {
    let h = harness();
    let attempts = seen();

    let service = {
        let attempts = Arc::clone(&attempts);
        Service::new()
            .with_config(
                queue("strict")
                    .with_ack_mode(AckMode::Transacted)
                    .with_redelivery_policy(RedeliveryPolicy::immediate().with_maximum_redeliveries(0)),
            )
            .on_message_with_caller(move |message, caller| {
                attempts.lock().unwrap().push(message.message_id.clone());
                caller.rollback()?;
                Ok(())
            })
    };
    h.listener.attach(&service).unwrap();
    h.listener.start().unwrap();
    h.send("strict", "once");

    assert!(wait_until(|| h.broker.dead_letters().len() == 1));
    assert_eq!(count(&attempts), 1);
    h.listener.graceful_stop();
}
