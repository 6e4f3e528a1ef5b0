//! Single-producer single-consumer event streams.
//!
//! A lifecycle manager owns the [`EventPublisher`] half; the supervisor owns
//! the [`EventConsumer`] half. Dropping every clone of the publisher closes
//! the channel, which is how a manager signals its own teardown.

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

pub fn pub_sub<E>() -> (EventPublisher<E>, EventConsumer<E>) {
    let (tx, rx) = unbounded();
    (EventPublisher(tx), EventConsumer(rx))
}

pub struct EventPublisher<E>(Sender<E>);

impl<E> EventPublisher<E> {
    /// Best-effort publish: a closed channel (consumer gone) is not a panic.
    pub fn publish(&self, event: E) {
        let _ = self.0.send(event);
    }
}

impl<E> Clone for EventPublisher<E> {
    fn clone(&self) -> Self {
        EventPublisher(self.0.clone())
    }
}

pub struct EventConsumer<E>(Receiver<E>);

impl<E> EventConsumer<E> {
    /// Blocks until an event arrives or the channel closes (`None`).
    pub fn recv(&self) -> Option<E> {
        self.0.recv().ok()
    }

    /// Blocks up to `timeout`; `None` on timeout or a closed channel.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<E> {
        match self.0.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}
