//! Packet staging queue
//!
//! FIFO hand-off between the reader thread and the consumer. Packets arrive
//! complete and leave whole; the consumer keeps at most one partially drained
//! packet outside the queue. The data-ready callback fires exactly once per
//! empty-to-nonempty transition, not once per packet.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::HciPacket;

/// Events delivered to the upper layer's notification callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// The packet queue went from empty to nonempty; `read` will yield data.
    DataReady,
}

/// Notification callback registered at `open` time. Invoked from the reader
/// thread, so it must not block; the usual pattern is to signal the consumer
/// and return.
pub type EventCallback = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// FIFO queue of complete packets awaiting consumption.
pub struct PacketQueue {
    inner: Mutex<VecDeque<HciPacket>>,
    callback: Mutex<Option<EventCallback>>,
}

impl PacketQueue {
    /// Create an empty queue with no callback registered.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            callback: Mutex::new(None),
        }
    }

    /// Register the consumer's notification callback.
    pub fn set_callback(&self, callback: EventCallback) {
        *self.callback.lock().expect("callback mutex poisoned") = Some(callback);
    }

    /// Remove the registered callback, if any.
    pub fn clear_callback(&self) {
        *self.callback.lock().expect("callback mutex poisoned") = None;
    }

    /// Append a completed packet. Never blocks the producer beyond the queue
    /// mutex; fires the data-ready callback when this push made the queue
    /// nonempty.
    pub fn push(&self, packet: HciPacket) {
        let was_empty = {
            let mut inner = self.inner.lock().expect("queue mutex poisoned");
            let was_empty = inner.is_empty();
            inner.push_back(packet);
            was_empty
        };

        if was_empty {
            let callback = self
                .callback
                .lock()
                .expect("callback mutex poisoned")
                .clone();
            if let Some(callback) = callback {
                callback(TransportEvent::DataReady);
            }
        }
    }

    /// Pop the oldest packet, or `None` immediately if the queue is empty.
    pub fn pop(&self) -> Option<HciPacket> {
        self.inner.lock().expect("queue mutex poisoned").pop_front()
    }

    /// Discard every queued packet. Shutdown only; returns how many packets
    /// were dropped.
    pub fn drain(&self) -> usize {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        let discarded = inner.len();
        inner.clear();
        if discarded > 0 {
            debug!(discarded, "drained packet queue");
        }
        discarded
    }

    /// Number of packets waiting.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::transport::PacketKind;

    fn packet(first_byte: u8) -> HciPacket {
        HciPacket::new(PacketKind::Event, vec![0x04, first_byte, 0x00])
    }

    #[test]
    fn test_fifo_order() {
        let queue = PacketQueue::new();
        queue.push(packet(1));
        queue.push(packet(2));
        queue.push(packet(3));

        for expected in 1..=3u8 {
            let p = queue.pop().expect("queue should not be empty");
            assert_eq!(p.payload()[1], expected);
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_callback_once_per_transition() {
        let queue = PacketQueue::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        queue.set_callback(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        // Burst while empty: one notification, not three.
        queue.push(packet(1));
        queue.push(packet(2));
        queue.push(packet(3));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Drain to empty, then push again: second transition, second fire.
        while queue.pop().is_some() {}
        queue.push(packet(4));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drain_discards_everything() {
        let queue = PacketQueue::new();
        queue.push(packet(1));
        queue.push(packet(2));
        assert_eq!(queue.drain(), 2);
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_no_callback_registered() {
        let queue = PacketQueue::new();
        queue.push(packet(1));
        assert_eq!(queue.len(), 1);
    }
}
