//! Listener integration tests against the in-memory broker.

mod support;

mod ack_modes;
mod backpressure;
mod durable;
mod failures;
mod lifecycle;
mod selectors;
mod stop;
mod validation;
