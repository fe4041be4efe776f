//! One message in flight per subscription; subscriptions run independently.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::TryRecvError;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use mq_listener::broker::{BrokerMessage, InMemorySession, SessionControl};
use mq_listener::listener::{Completion, CompletionGate, Dispatcher, LogSink};
use mq_listener::service::{validate, ON_MESSAGE};
use mq_listener::{HandlerError, Service};

use crate::support::{count, harness, queue, seen, text, wait_until, WAIT};

#[test]
fn never_more_than_one_handler_in_flight() {
    let h = harness();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let handled = seen();

    let service = {
        let (active, peak, handled) = (Arc::clone(&active), Arc::clone(&peak), Arc::clone(&handled));
        Service::new()
            .with_config(queue("work"))
            .on_message(move |message| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(30));
                handled.lock().unwrap().push(text(message));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
    };
    h.listener.attach(&service).unwrap();
    h.listener.start().unwrap();

    for i in 0..5 {
        h.send("work", &format!("job-{}", i));
    }
    assert!(wait_until(|| count(&handled) == 5));
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    let expected: Vec<String> = (0..5).map(|i| format!("job-{}", i)).collect();
    assert_eq!(*handled.lock().unwrap(), expected);
    h.listener.graceful_stop();
}

#[test]
fn subscriptions_are_processed_in_parallel() {
    let h = harness();
    let a_running = Arc::new(AtomicBool::new(false));
    let b_running = Arc::new(AtomicBool::new(false));
    let overlapped = seen();

    let waiting_on = |mine: &Arc<AtomicBool>, other: &Arc<AtomicBool>, name: &str| {
        let (mine, other, overlapped) = (Arc::clone(mine), Arc::clone(other), Arc::clone(&overlapped));
        Service::new()
            .with_config(queue(name))
            .on_message(move |_| {
                mine.store(true, Ordering::SeqCst);
                let saw_other = wait_until(|| other.load(Ordering::SeqCst));
                overlapped.lock().unwrap().push(saw_other);
                Ok(())
            })
    };
    let a = waiting_on(&a_running, &b_running, "left");
    let b = waiting_on(&b_running, &a_running, "right");
    h.listener.attach(&a).unwrap();
    h.listener.attach(&b).unwrap();
    h.listener.start().unwrap();

    h.send("left", "x");
    h.send("right", "y");
    assert!(wait_until(|| count(&overlapped) == 2));
    assert_eq!(*overlapped.lock().unwrap(), vec![true, true]);
    h.listener.graceful_stop();
}

#[test]
fn slow_handler_holds_back_the_next_poll() {
    let h = harness();
    let release = Arc::new(AtomicBool::new(false));
    let handled = seen();

    let service = {
        let (release, handled) = (Arc::clone(&release), Arc::clone(&handled));
        Service::new()
            .with_config(queue("held"))
            .on_message(move |message| {
                handled.lock().unwrap().push(text(message));
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            })
    };
    h.listener.attach(&service).unwrap();
    h.listener.start().unwrap();

    h.send("held", "first");
    h.send("held", "second");
    assert!(wait_until(|| count(&handled) == 1));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(count(&handled), 1);
    assert_eq!(h.broker.queue_len("held"), 1);

    release.store(true, Ordering::SeqCst);
    assert!(wait_until(|| count(&handled) == 2));
    h.listener.graceful_stop();
}

fn delivered(id: &str, body: &str) -> BrokerMessage {
    let mut message = BrokerMessage::text(body);
    message.message_id = id.to_string();
    message
}

#[test]
fn gate_keeps_its_first_outcome() {
    let handled = seen();
    let failures = Arc::new(Mutex::new(Vec::new()));
    let service = {
        let handled = Arc::clone(&handled);
        Service::new()
            .with_config(queue("gated"))
            .on_message(move |message| {
                handled.lock().unwrap().push(text(message));
                if text(message) == "bad" {
                    return Err(HandlerError::Rejected("bad payload".into()));
                }
                Ok(())
            })
    };
    let shape = validate(&service).unwrap();
    let body = service.method(ON_MESSAGE).unwrap().body();
    let session: Weak<dyn SessionControl> = Weak::<InMemorySession>::new();
    let dispatcher = Arc::new(Dispatcher::new(
        "queue://gated",
        body,
        None,
        shape,
        session,
        Arc::new(LogSink::with_buffer(Arc::clone(&failures))),
    ));

    // Released with Success before the failing handler gets to release it.
    let (gate, done) = CompletionGate::new();
    let early = gate.clone();
    assert!(early.release(Completion::Success));
    dispatcher.dispatch(delivered("ID:1", "bad"), gate);

    assert_eq!(done.recv_timeout(WAIT).unwrap(), Completion::Success);
    assert!(wait_until(|| failures.lock().unwrap().len() == 1));
    assert!(!early.release(Completion::Failure));
    assert!(matches!(
        done.try_recv(),
        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected)
    ));

    let (gate, done) = CompletionGate::new();
    dispatcher.dispatch(delivered("ID:2", "good"), gate);
    assert_eq!(done.recv_timeout(WAIT).unwrap(), Completion::Success);
    assert_eq!(*handled.lock().unwrap(), vec!["bad", "good"]);
    assert_eq!(failures.lock().unwrap().len(), 1);
}
