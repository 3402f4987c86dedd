use super::EventHash;
use std::collections::{HashSet, VecDeque};

/// Number of recent event hashes remembered.
pub const DEDUP_CAPACITY: usize = 100;

/// Bounded FIFO set of recently seen event hashes.
#[derive(Debug)]
pub struct DedupCache {
    order: VecDeque<EventHash>,
    seen: HashSet<EventHash>,
    capacity: usize,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEDUP_CAPACITY)
    }
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity + 1),
            seen: HashSet::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn is_duplicate(&self, hash: &EventHash) -> bool {
        self.seen.contains(hash)
    }

    /// Remember a hash. Once over capacity, the oldest entries are dropped in
    /// a single compaction so only the most recent `capacity` remain.
    pub fn mark(&mut self, hash: EventHash) {
        if !self.seen.insert(hash) {
            return;
        }
        self.order.push_back(hash);

        if self.order.len() > self.capacity {
            let excess = self.order.len() - self.capacity;
            for old in self.order.drain(..excess) {
                self.seen.remove(&old);
            }
        }
    }

    /// Check and mark in one step. Returns `true` if the hash was new.
    pub fn admit(&mut self, hash: EventHash) -> bool {
        if self.is_duplicate(&hash) {
            return false;
        }
        self.mark(hash);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
