//! Graceful vs immediate shutdown with a handler in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mq_listener::{ListenerState, Service};

use crate::support::{connection, harness, harness_with, queue, wait_until, Harness};

struct Slow {
    started: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

fn slow_handler(h: &Harness, sleep: Duration) -> Slow {
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let service = {
        let (started, finished) = (Arc::clone(&started), Arc::clone(&finished));
        Service::new()
            .with_config(queue("slow"))
            .on_message(move |_| {
                started.store(true, Ordering::SeqCst);
                thread::sleep(sleep);
                finished.store(true, Ordering::SeqCst);
                Ok(())
            })
    };
    h.listener.attach(&service).unwrap();
    h.listener.start().unwrap();
    h.send("slow", "work");
    assert!(wait_until(|| started.load(Ordering::SeqCst)));
    Slow { started, finished }
}

#[test]
fn graceful_stop_waits_for_the_in_flight_handler() {
    let h = harness();
    let slow = slow_handler(&h, Duration::from_millis(300));

    h.listener.graceful_stop();
    assert!(slow.started.load(Ordering::SeqCst));
    assert!(slow.finished.load(Ordering::SeqCst));
    assert_eq!(h.listener.state(), ListenerState::Stopped);
    assert_eq!(h.broker.open_sessions(), 0);
}

#[test]
fn immediate_stop_does_not_wait() {
    let h = harness();
    let slow = slow_handler(&h, Duration::from_millis(1000));

    let begun = Instant::now();
    h.listener.immediate_stop();
    assert!(begun.elapsed() < Duration::from_millis(500));
    assert!(!slow.finished.load(Ordering::SeqCst));
    assert_eq!(h.broker.open_sessions(), 0);
    assert_eq!(h.listener.state(), ListenerState::Stopped);
}

#[test]
fn graceful_stop_gives_up_after_the_stop_timeout() {
    let h = harness_with(connection(), |l| l.with_stop_timeout(Duration::from_millis(50)));
    let slow = slow_handler(&h, Duration::from_millis(1000));

    let begun = Instant::now();
    h.listener.graceful_stop();
    assert!(begun.elapsed() < Duration::from_millis(600));
    assert!(!slow.finished.load(Ordering::SeqCst));
    assert_eq!(h.broker.open_consumers(), 0);
}

#[test]
fn idle_listener_stops_promptly() {
    let h = harness();
    let service = Service::new()
        .with_config(queue("idle").with_receive_timeout(Duration::from_secs(5)))
        .on_message(|_| Ok(()));
    h.listener.attach(&service).unwrap();
    h.listener.start().unwrap();
    thread::sleep(Duration::from_millis(50));

    let begun = Instant::now();
    h.listener.graceful_stop();
    assert!(begun.elapsed() < Duration::from_secs(1));
}
