//! Message id generation.
//!
//! An explicitly-constructed generator owned by the composition root and
//! injected where ids are minted. Ids are epoch-millis plus a node id and a
//! wrapping sequence, unique within a deployment without coordination.

use crate::message::MessageId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const SEQUENCE_BITS: u64 = 12;
const NODE_BITS: u64 = 8;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const NODE_MASK: u64 = (1 << NODE_BITS) - 1;

/// Process-wide message id generator.
#[derive(Debug)]
pub struct MessageIdGenerator {
    node_id: u64,
    sequence: AtomicU64,
}

impl MessageIdGenerator {
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id: u64::from(node_id) & NODE_MASK,
            sequence: AtomicU64::new(0),
        }
    }

    /// Issue the next id.
    pub fn next_id(&self) -> MessageId {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) & SEQUENCE_MASK;
        let value = (millis << (NODE_BITS + SEQUENCE_BITS)) | (self.node_id << SEQUENCE_BITS) | seq;
        MessageId(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_within_a_burst() {
        let generator = MessageIdGenerator::new(1);
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(generator.next_id()));
        }
    }

    #[test]
    fn node_id_distinguishes_generators() {
        let a = MessageIdGenerator::new(1);
        let b = MessageIdGenerator::new(2);
        assert_ne!(a.next_id(), b.next_id());
    }
}
