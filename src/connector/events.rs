//! Lifecycle notifications emitted by a [`Connector`](super::Connector).
use std::sync::{PoisonError, RwLock};

/// A dial attempt failed. Emitted before waiting for the next attempt.
#[derive(Debug)]
pub struct Retried<'a> {
    /// 1-based, reset after every successful dial.
    pub attempt: u32,
    pub error: &'a anyhow::Error,
}

/// A connection has been established.
#[derive(Debug, Clone, Copy)]
pub struct Dialed {
    /// Identifies the connection: it increases by one on every successful dial.
    pub generation: u64,
}

/// The broker notified an error out of band, e.g. it closed the connection.
#[derive(Debug)]
pub struct AmqpNotified<'a> {
    pub error: &'a anyhow::Error,
}

pub(super) type RetriedListener = Box<dyn Fn(&Retried<'_>) + Send + Sync>;
pub(super) type DialedListener = Box<dyn Fn(&Dialed) + Send + Sync>;
pub(super) type AmqpNotifiedListener = Box<dyn Fn(&AmqpNotified<'_>) + Send + Sync>;

#[derive(Default)]
pub(super) struct Listeners {
    retried: RwLock<Vec<RetriedListener>>,
    dialed: RwLock<Vec<DialedListener>>,
    amqp_notified: RwLock<Vec<AmqpNotifiedListener>>,
}

impl Listeners {
    pub(super) fn add_retried(&self, listener: RetriedListener) {
        push(&self.retried, listener);
    }

    pub(super) fn add_dialed(&self, listener: DialedListener) {
        push(&self.dialed, listener);
    }

    pub(super) fn add_amqp_notified(&self, listener: AmqpNotifiedListener) {
        push(&self.amqp_notified, listener);
    }

    pub(super) fn retried(&self, event: &Retried<'_>) {
        let listeners = self.retried.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(event);
        }
    }

    pub(super) fn dialed(&self, event: &Dialed) {
        let listeners = self.dialed.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(event);
        }
    }

    pub(super) fn amqp_notified(&self, event: &AmqpNotified<'_>) {
        let listeners = self
            .amqp_notified
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(event);
        }
    }
}

fn push<L>(listeners: &RwLock<Vec<L>>, listener: L) {
    listeners
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(listener);
}
