//! Bounded FIFO handoff queues.
//!
//! Both directions of the I/O ↔ worker handoff use this queue: the task
//! queue (I/O thread produces, pool threads consume) and the response queue
//! (pool threads produce, I/O thread consumes). `push` never blocks; a full
//! queue is the back-pressure signal the caller turns into HTTP 503.
//! `stop` wakes every blocked consumer, and consumers keep draining queued
//! items before observing the stop.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushError {
    Full,
    Stopped,
}

#[derive(Debug)]
pub(crate) struct Bounded<T> {
    tx: Mutex<Option<Sender<T>>>,
    rx: Receiver<T>,
}

impl<T> Bounded<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Non-blocking enqueue; `Full` at capacity, `Stopped` after `stop`.
    pub(crate) fn push(&self, item: T) -> Result<(), PushError> {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());

        match guard.as_ref() {
            Some(tx) => tx.try_send(item).map_err(|e| match e {
                TrySendError::Full(_) => PushError::Full,
                TrySendError::Disconnected(_) => PushError::Stopped,
            }),
            None => Err(PushError::Stopped),
        }
    }

    /// Blocks until an item arrives. `None` once the queue is stopped and
    /// drained; already-queued items are always delivered first.
    #[inline]
    pub(crate) fn pop_blocking(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Moves everything currently queued into `out` without blocking.
    #[inline]
    pub(crate) fn drain_into(&self, out: &mut Vec<T>) {
        out.extend(self.rx.try_iter());
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    /// Stops the queue: wakes all blocked consumers; further pushes fail.
    pub(crate) fn stop(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}
