//! Bounded FIFO message queue with a hysteresis health flag.

use gateway_types::RawMessage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Outcome of an enqueue attempt.
#[derive(Debug)]
pub enum EnqueueOutcome {
    Accepted,
    /// Queue at capacity; the message comes back so the caller can mark it
    /// ERROR. The queue itself is untouched.
    Rejected(Box<RawMessage>),
}

impl EnqueueOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, EnqueueOutcome::Accepted)
    }
}

/// Shared inbound queue between adapters and the batch processor.
///
/// Health flips unhealthy at/above capacity and recovers only at/below half
/// capacity, so a queue hovering near full does not flap the indicator.
pub struct MessageQueue {
    inner: Mutex<VecDeque<RawMessage>>,
    capacity: usize,
    healthy: AtomicBool,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            healthy: AtomicBool::new(true),
        }
    }

    /// Append a message, rejecting when full.
    pub fn enqueue(&self, message: RawMessage) -> EnqueueOutcome {
        let mut inner = self.inner.lock();
        if inner.len() >= self.capacity {
            self.healthy.store(false, Ordering::Relaxed);
            warn!(
                message = %message.id,
                capacity = self.capacity,
                "message queue full, rejecting"
            );
            return EnqueueOutcome::Rejected(Box::new(message));
        }
        inner.push_back(message);
        if inner.len() >= self.capacity {
            self.healthy.store(false, Ordering::Relaxed);
        }
        EnqueueOutcome::Accepted
    }

    /// Remove and return up to `max` messages in FIFO order.
    pub fn drain(&self, max: usize) -> Vec<RawMessage> {
        let mut inner = self.inner.lock();
        let count = max.min(inner.len());
        let drained: Vec<RawMessage> = inner.drain(..count).collect();
        if inner.len() * 2 <= self.capacity {
            self.healthy.store(true, Ordering::Relaxed);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::{DeviceId, MessageId};

    fn msg(n: usize) -> RawMessage {
        RawMessage::new(
            MessageId(format!("m{n}")),
            DeviceId::from("d1"),
            "GENERIC",
            format!("payload-{n}\r"),
        )
    }

    #[test]
    fn fifo_order_preserved() {
        let queue = MessageQueue::new(10);
        for n in 0..3 {
            assert!(queue.enqueue(msg(n)).is_accepted());
        }
        let drained = queue.drain(10);
        let ids: Vec<&str> = drained.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn rejects_when_full_and_size_unchanged() {
        let queue = MessageQueue::new(2);
        assert!(queue.enqueue(msg(0)).is_accepted());
        assert!(queue.enqueue(msg(1)).is_accepted());
        match queue.enqueue(msg(2)) {
            EnqueueOutcome::Rejected(returned) => assert_eq!(returned.id.as_str(), "m2"),
            EnqueueOutcome::Accepted => panic!("full queue accepted a message"),
        }
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn health_hysteresis() {
        let queue = MessageQueue::new(4);
        assert!(queue.is_healthy());
        for n in 0..4 {
            queue.enqueue(msg(n));
        }
        assert!(!queue.is_healthy());

        // Draining one leaves 3 > capacity/2: still unhealthy.
        queue.drain(1);
        assert!(!queue.is_healthy());

        // Down to 2 == capacity/2: healthy again.
        queue.drain(1);
        assert!(queue.is_healthy());
    }

    #[test]
    fn health_holds_under_interleaving() {
        let queue = MessageQueue::new(4);
        for n in 0..4 {
            queue.enqueue(msg(n));
        }
        assert!(!queue.is_healthy());
        queue.drain(1);
        queue.enqueue(msg(9));
        // Never dipped to half capacity: unhealthy throughout.
        assert!(!queue.is_healthy());
    }

    #[test]
    fn drain_caps_at_requested_max() {
        let queue = MessageQueue::new(10);
        for n in 0..5 {
            queue.enqueue(msg(n));
        }
        assert_eq!(queue.drain(2).len(), 2);
        assert_eq!(queue.len(), 3);
    }
}
