//! Receiver: the polling loop of one subscription.
//!
//! The loop runs on its own thread at a fixed rate. After handing a message
//! to the dispatcher it blocks on a [`CompletionGate`] until the handler
//! terminates, so at most one handler per subscription is ever in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::Dispatcher;
use crate::broker::{BrokerError, Consumer, Session};
use crate::config::SubscriptionConfig;
use crate::error::ListenerError;

/// Grace period a graceful stop gives an in-flight handler.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Consecutive receive failures after which polling is cancelled.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// How often a poller blocked on the gate checks for forced cancellation.
const GATE_CHECK: Duration = Duration::from_millis(20);

/// Outcome reported through a completion gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    Success,
    Failure,
}

struct GateInner {
    slot: Mutex<Option<SyncSender<Completion>>>,
}

impl Drop for GateInner {
    fn drop(&mut self) {
        let sender = self
            .slot
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.try_send(Completion::Failure);
        }
    }
}

/// Single-use completion signal between a handler and its poller.
///
/// The first [`release`](Self::release) delivers the outcome; later calls
/// are no-ops returning `false`. If every clone is dropped without a
/// release, the poller is released with [`Completion::Failure`].
#[derive(Clone)]
pub struct CompletionGate {
    inner: Arc<GateInner>,
}

impl CompletionGate {
    /// Create a gate and the receiving end the poller blocks on.
    pub fn new() -> (Self, mpsc::Receiver<Completion>) {
        let (tx, rx) = mpsc::sync_channel(1);
        let gate = Self {
            inner: Arc::new(GateInner {
                slot: Mutex::new(Some(tx)),
            }),
        };
        (gate, rx)
    }

    /// Release the gate. Returns `false` if it was already released.
    pub fn release(&self, outcome: Completion) -> bool {
        let sender = self
            .inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => {
                let _ = sender.try_send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Statistics of one receiver.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Poll cycles started.
    pub polls: usize,
    /// Messages whose handler succeeded.
    pub handled: usize,
    /// Messages whose handling failed.
    pub failed: usize,
    /// Receive calls that failed.
    pub errors: usize,
}

struct Worker {
    stop_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

/// Owns the session and consumer of one subscription and polls them.
pub struct Receiver<S: Session> {
    label: String,
    session: Arc<S>,
    consumer: Arc<S::Consumer>,
    dispatcher: Arc<Dispatcher>,
    polling_interval: Duration,
    receive_timeout: Duration,
    max_consecutive_failures: u32,
    closed: Arc<AtomicBool>,
    forced: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
    stats: Arc<Mutex<ReceiverStats>>,
    worker: Mutex<Option<Worker>>,
}

impl<S: Session> Receiver<S> {
    pub fn new(
        session: Arc<S>,
        consumer: S::Consumer,
        dispatcher: Arc<Dispatcher>,
        config: &SubscriptionConfig,
    ) -> Self {
        Self {
            label: dispatcher.label().to_string(),
            session,
            consumer: Arc::new(consumer),
            dispatcher,
            polling_interval: config.polling_interval(),
            receive_timeout: config.receive_timeout(),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            closed: Arc::new(AtomicBool::new(false)),
            forced: Arc::new(AtomicBool::new(false)),
            busy: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(ReceiverStats::default())),
            worker: Mutex::new(None),
        }
    }

    /// Cancel polling after this many consecutive receive failures.
    /// Zero is treated as one.
    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max.max(1);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether the polling thread is running.
    pub fn is_consuming(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start polling, first cycle immediately. No-op when already consuming
    /// or closed.
    pub fn consume(&self) -> Result<(), ListenerError> {
        if self.is_closed() {
            return Ok(());
        }
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let poller = Poller {
            label: self.label.clone(),
            consumer: Arc::clone(&self.consumer),
            dispatcher: Arc::clone(&self.dispatcher),
            polling_interval: self.polling_interval,
            receive_timeout: self.receive_timeout,
            max_consecutive_failures: self.max_consecutive_failures,
            closed: Arc::clone(&self.closed),
            forced: Arc::clone(&self.forced),
            busy: Arc::clone(&self.busy),
            stats: Arc::clone(&self.stats),
        };

        let handle = thread::Builder::new()
            .name(format!("{}-poller", self.label))
            .spawn(move || {
                poller.run(stop_rx);
                let _ = done_tx.send(());
            })
            .map_err(|err| ListenerError::Transport(BrokerError::Io(err.to_string())))?;

        info!(destination = %self.label, interval_ms = self.polling_interval.as_millis() as u64, "receiver consuming");
        *worker = Some(Worker {
            stop_tx,
            done_rx,
            handle,
        });
        Ok(())
    }

    /// Stop the polling thread, keeping the consumer and session open so a
    /// later [`consume`](Self::consume) resumes. Waits for an in-flight
    /// handler.
    pub fn pause(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.stop_tx.send(());
            let _ = worker.handle.join();
            debug!(destination = %self.label, "receiver paused");
        }
    }

    /// Stop polling and release the session.
    ///
    /// Marks the receiver closed, cancels scheduling, waits up to `grace`
    /// for an in-flight handler, then closes the consumer and session. A
    /// handler still running after `grace` is abandoned. Idempotent.
    pub fn stop(&self, grace: Duration) -> ReceiverStats {
        if self.closed.swap(true, Ordering::SeqCst) {
            return self.stats();
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut finished = None;
        let mut consumer_closed = false;
        if let Some(worker) = worker {
            let _ = worker.stop_tx.send(());
            // Nothing in flight: end a blocking receive now.
            if !self.busy.load(Ordering::SeqCst) {
                self.close_consumer();
                consumer_closed = true;
            }
            match worker.done_rx.recv_timeout(grace) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
                Err(RecvTimeoutError::Timeout) => {
                    self.forced.store(true, Ordering::SeqCst);
                    if self.busy.load(Ordering::SeqCst) {
                        warn!(
                            destination = %self.label,
                            grace_ms = grace.as_millis() as u64,
                            "in-flight handler still running after grace period, cancelling"
                        );
                    }
                }
            }
            finished = Some(worker.handle);
        }

        if !consumer_closed {
            self.close_consumer();
        }
        if let Err(err) = self.session.close() {
            warn!(destination = %self.label, error = %err, "failed to close session");
        }
        // The poller exits promptly once forced or once its consumer is closed.
        if let Some(handle) = finished {
            let _ = handle.join();
        }

        let stats = self.stats();
        info!(
            destination = %self.label,
            polls = stats.polls,
            handled = stats.handled,
            failed = stats.failed,
            "receiver stopped"
        );
        stats
    }

    fn close_consumer(&self) {
        if let Err(err) = self.consumer.close() {
            warn!(destination = %self.label, error = %err, "failed to close consumer");
        }
    }
}

struct Poller<C: Consumer> {
    label: String,
    consumer: Arc<C>,
    dispatcher: Arc<Dispatcher>,
    polling_interval: Duration,
    receive_timeout: Duration,
    max_consecutive_failures: u32,
    closed: Arc<AtomicBool>,
    forced: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
    stats: Arc<Mutex<ReceiverStats>>,
}

impl<C: Consumer> Poller<C> {
    fn record(&self, update: impl FnOnce(&mut ReceiverStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Wait for the next tick. Returns `false` when stop was requested.
    fn wait_for_tick(&self, stop_rx: &mpsc::Receiver<()>, next: Instant) -> bool {
        let now = Instant::now();
        if next > now {
            match stop_rx.recv_timeout(next - now) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
                Err(RecvTimeoutError::Timeout) => true,
            }
        } else {
            match stop_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => false,
                Err(TryRecvError::Empty) => true,
            }
        }
    }

    /// Block until the handler releases the gate. `None` when cancelled.
    fn await_completion(&self, done: &mpsc::Receiver<Completion>) -> Option<Completion> {
        loop {
            match done.recv_timeout(GATE_CHECK) {
                Ok(outcome) => return Some(outcome),
                Err(RecvTimeoutError::Disconnected) => return Some(Completion::Failure),
                Err(RecvTimeoutError::Timeout) => {
                    if self.forced.load(Ordering::SeqCst) {
                        return None;
                    }
                }
            }
        }
    }

    fn run(self, stop_rx: mpsc::Receiver<()>) {
        let mut next = Instant::now();
        let mut failures = 0u32;

        loop {
            if !self.wait_for_tick(&stop_rx, next) || self.closed.load(Ordering::SeqCst) {
                break;
            }
            next += self.polling_interval;
            self.record(|s| s.polls += 1);

            match self.consumer.receive(self.receive_timeout) {
                Ok(None) => failures = 0,
                Ok(Some(native)) => {
                    failures = 0;
                    let (gate, done) = CompletionGate::new();
                    self.busy.store(true, Ordering::SeqCst);
                    self.dispatcher.dispatch(native, gate);
                    let outcome = self.await_completion(&done);
                    self.busy.store(false, Ordering::SeqCst);
                    match outcome {
                        Some(Completion::Success) => self.record(|s| s.handled += 1),
                        Some(Completion::Failure) => self.record(|s| s.failed += 1),
                        None => {
                            debug!(destination = %self.label, "poller cancelled while a handler was running");
                            break;
                        }
                    }
                }
                Err(err) => {
                    if self.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    failures += 1;
                    self.record(|s| s.errors += 1);
                    let cancel = err.is_fatal() || failures >= self.max_consecutive_failures;
                    warn!(destination = %self.label, error = %err, failures, "receive failed");
                    self.dispatcher.on_error(ListenerError::Transport(err));
                    if cancel {
                        warn!(destination = %self.label, "polling cancelled after receive failure");
                        break;
                    }
                }
            }

            // An overrunning cycle starts the next one immediately.
            let now = Instant::now();
            if next < now {
                next = now;
            }
        }

        debug!(destination = %self.label, "poller exited");
    }
}
