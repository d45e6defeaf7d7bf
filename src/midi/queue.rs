//! Bounded FIFO queue carrying raw MIDI bytes from the controller-input callback thread
//! into the remap thread.
//!
//! Backed by `flume`'s bounded channel, same as the teacher's callback-to-app bridge —
//! the policy difference is what happens when it's full: the spec calls for dropping
//! the newest message (not blocking the callback thread, which must never stall).

use std::time::Instant;

use flume::{Receiver, Sender, TrySendError};

pub const QUEUE_CAPACITY: usize = 1024;

/// A single ingested MIDI message with its arrival time, for latency diagnostics.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub bytes: Vec<u8>,
    pub arrived_at: Instant,
}

/// The producer half, held by the controller-input callback.
#[derive(Clone)]
pub struct QueueSender {
    inner: Sender<QueuedMessage>,
}

/// The consumer half, held by the remap thread.
pub struct QueueReceiver {
    inner: Receiver<QueuedMessage>,
}

pub fn bounded() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = flume::bounded(QUEUE_CAPACITY);
    (QueueSender { inner: tx }, QueueReceiver { inner: rx })
}

impl QueueSender {
    /// Push a message, never blocking. Returns `false` (and logs) if the queue was
    /// full, in which case the newest message — this one — is the one dropped.
    pub fn push(&self, bytes: Vec<u8>) -> bool {
        let message = QueuedMessage { bytes, arrived_at: Instant::now() };
        match self.inner.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("MIDI ingress queue full (capacity {QUEUE_CAPACITY}); dropping newest message");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::error!("MIDI ingress queue has no receiver; message dropped");
                false
            }
        }
    }
}

impl QueueReceiver {
    /// Block for up to `timeout` waiting for the next message.
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<QueuedMessage> {
        self.inner.recv_timeout(timeout).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_receive_round_trips() {
        let (tx, rx) = bounded();
        assert!(tx.push(vec![0x90, 60, 100]));
        let received = rx.recv_timeout(std::time::Duration::from_millis(50)).unwrap();
        assert_eq!(received.bytes, vec![0x90, 60, 100]);
    }

    #[test]
    fn full_queue_drops_newest_and_reports_false() {
        let (tx, _rx) = flume::bounded::<QueuedMessage>(1);
        let sender = QueueSender { inner: tx };
        assert!(sender.push(vec![1]));
        assert!(!sender.push(vec![2]));
    }
}
