//! Caller: acknowledgement and transaction control handed to handlers.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::broker::{BrokerError, SessionControl};
use crate::config::AckMode;
use crate::message::Message;

/// Handle to the session that delivered the current message.
///
/// Holds a non-owning reference: once the receiver closes the session,
/// every operation fails with [`BrokerError::SessionClosed`]. Operations
/// that do not fit the session's ack mode are refused by the broker with
/// [`BrokerError::IllegalState`] rather than silently succeeding.
#[derive(Clone)]
pub struct Caller {
    session: Weak<dyn SessionControl>,
    ack_mode: AckMode,
}

impl Caller {
    pub(crate) fn new(session: Weak<dyn SessionControl>, ack_mode: AckMode) -> Self {
        Self { session, ack_mode }
    }

    /// Ack mode of the underlying session.
    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    fn session(&self) -> Result<Arc<dyn SessionControl>, BrokerError> {
        self.session.upgrade().ok_or(BrokerError::SessionClosed)
    }

    /// Acknowledge `message` and every earlier unacknowledged message on
    /// this session. CLIENT mode only.
    pub fn acknowledge(&self, message: &Message) -> Result<(), BrokerError> {
        self.session()?.acknowledge(&message.message_id)
    }

    /// Commit the current transaction. TRANSACTED mode only.
    pub fn commit(&self) -> Result<(), BrokerError> {
        self.session()?.commit()
    }

    /// Roll back the current transaction so its messages are redelivered.
    /// TRANSACTED mode only.
    pub fn rollback(&self) -> Result<(), BrokerError> {
        self.session()?.rollback()
    }
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caller")
            .field("ack_mode", &self.ack_mode)
            .field("attached", &(self.session.strong_count() > 0))
            .finish()
    }
}
