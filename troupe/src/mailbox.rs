//! The per-actor message queue.
//!
//! A multi-producer, single-consumer FIFO. Producers are service handles
//! calling [`Mailbox::enqueue`]; the single consumer is the owning actor's
//! run loop, which waits on [`Mailbox::notified`] and then detaches the
//! whole pending chain with [`Mailbox::take_head`] so it can iterate without
//! touching producer state again.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::envelope::Envelope;

#[derive(Debug)]
pub(crate) struct Mailbox {
    sender: flume::Sender<Envelope>,
    receiver: flume::Receiver<Envelope>,
    notify: Notify,
    is_closed: AtomicBool,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            sender,
            receiver,
            notify: Notify::new(),
            is_closed: AtomicBool::new(false),
        }
    }

    /// Pushes an item. Enqueues to a closed mailbox are silently dropped;
    /// from the caller's perspective the operation is infallible.
    pub(crate) fn enqueue(&self, item: Envelope) {
        if self.is_closed.load(Ordering::Acquire) {
            tracing::trace!("dropping message for closed actor");
            return;
        }
        if self.sender.send(item).is_ok() {
            self.notify.notify_one();
        }
    }

    /// Detaches the current chain. The returned items are no longer reachable
    /// from producers, so the consumer iterates them lock-free.
    pub(crate) fn take_head(&self) -> Vec<Envelope> {
        self.receiver.try_iter().collect()
    }

    /// Resolves once the queue has transitioned from empty to non-empty
    /// since the last wakeup. One token is buffered, so a signal arriving
    /// between `take_head` and this call is not lost.
    pub(crate) async fn notified(&self) {
        self.notify.notified().await;
    }

    pub(crate) fn close(&self) {
        self.is_closed.store(true, Ordering::Release);
        while self.receiver.try_recv().is_ok() {}
        self.notify.notify_waiters();
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }
}
