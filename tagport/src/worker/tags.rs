//! Tag allocation for endpoint conversations.
//!
//! Every endpoint holds a (send-tag, recv-tag) pair assigned at
//! connection establishment. Within one worker no two simultaneously-open
//! endpoints may hold the same tag value in the same direction; since
//! both directions draw from the same value space, the allocator simply
//! keeps every held value unique.

use std::collections::HashSet;

use crate::error::{TagError, TagResult};

/// An unsigned integer identifying one logical message stream between two
/// endpoints; used to match sends to receives.
pub type Tag = u64;

/// The (send-tag, recv-tag) pair held by one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagPair {
    /// Tag stamped on outbound frames.
    pub send: Tag,
    /// Tag matched against inbound frames.
    pub recv: Tag,
}

impl TagPair {
    /// The same pair seen from the remote side's perspective.
    pub fn flipped(&self) -> TagPair {
        TagPair {
            send: self.recv,
            recv: self.send,
        }
    }
}

/// Per-worker tag allocator with a bounded value space.
///
/// Released values are reused. `reserve` records a pair assigned by a
/// remote listener so the disjointness invariant also holds for outbound
/// connections.
#[derive(Debug)]
pub struct TagAllocator {
    /// Number of distinct tag values available.
    capacity: u64,
    /// Next candidate value for allocation scans.
    next: Tag,
    /// Every tag value currently held by an open endpoint.
    in_use: HashSet<Tag>,
}

impl TagAllocator {
    /// Create an allocator over `capacity` distinct tag values.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            next: 0,
            in_use: HashSet::new(),
        }
    }

    /// Allocate a fresh tag pair not currently held by any open endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::Exhausted`] if fewer than two values are free.
    pub fn allocate(&mut self) -> TagResult<TagPair> {
        let send = self.next_free()?;
        let recv = match self.next_free() {
            Ok(tag) => tag,
            Err(e) => {
                self.in_use.remove(&send);
                return Err(e);
            }
        };
        Ok(TagPair { send, recv })
    }

    /// Record a pair assigned by a remote listener.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::Exhausted`] if either value is already held
    /// locally; the local tag table cannot honor the pair.
    pub fn reserve(&mut self, pair: TagPair) -> TagResult<()> {
        if pair.send == pair.recv
            || self.in_use.contains(&pair.send)
            || self.in_use.contains(&pair.recv)
        {
            return Err(TagError::Exhausted);
        }
        self.in_use.insert(pair.send);
        self.in_use.insert(pair.recv);
        Ok(())
    }

    /// Return a pair to the free pool.
    ///
    /// Safe to call even if the endpoint closed abnormally or the pair was
    /// already released; releasing an unheld value is a no-op.
    pub fn release(&mut self, pair: TagPair) {
        self.in_use.remove(&pair.send);
        self.in_use.remove(&pair.recv);
    }

    /// Number of tag values currently held.
    pub fn active_count(&self) -> usize {
        self.in_use.len()
    }

    fn next_free(&mut self) -> TagResult<Tag> {
        for _ in 0..self.capacity {
            let candidate = self.next;
            self.next = (self.next + 1) % self.capacity;
            if self.in_use.insert(candidate) {
                return Ok(candidate);
            }
        }
        Err(TagError::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_pairs_are_disjoint() {
        let mut alloc = TagAllocator::new(64);
        let mut seen = HashSet::new();

        for _ in 0..16 {
            let pair = alloc.allocate().expect("allocate");
            assert!(seen.insert(pair.send), "send tag reused: {}", pair.send);
            assert!(seen.insert(pair.recv), "recv tag reused: {}", pair.recv);
        }
        assert_eq!(alloc.active_count(), 32);
    }

    #[test]
    fn test_exhaustion() {
        let mut alloc = TagAllocator::new(4);
        alloc.allocate().expect("first pair");
        alloc.allocate().expect("second pair");

        assert_eq!(alloc.allocate(), Err(TagError::Exhausted));
    }

    #[test]
    fn test_release_enables_reuse() {
        let mut alloc = TagAllocator::new(2);
        let pair = alloc.allocate().expect("allocate");
        assert_eq!(alloc.allocate(), Err(TagError::Exhausted));

        alloc.release(pair);
        alloc.allocate().expect("reuse after release");
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut alloc = TagAllocator::new(8);
        let pair = alloc.allocate().expect("allocate");

        alloc.release(pair);
        alloc.release(pair);
        assert_eq!(alloc.active_count(), 0);
    }

    #[test]
    fn test_reserve_conflict() {
        let mut alloc = TagAllocator::new(8);
        let pair = alloc.allocate().expect("allocate");

        assert_eq!(alloc.reserve(pair), Err(TagError::Exhausted));
        assert_eq!(
            alloc.reserve(TagPair { send: 6, recv: 6 }),
            Err(TagError::Exhausted)
        );
        alloc
            .reserve(TagPair { send: 6, recv: 7 })
            .expect("free values reserve cleanly");
    }

    #[test]
    fn test_flipped() {
        let pair = TagPair { send: 1, recv: 2 };
        assert_eq!(pair.flipped(), TagPair { send: 2, recv: 1 });
        assert_eq!(pair.flipped().flipped(), pair);
    }
}
