//! Neighbour tracking
//!
//! A neighbour is any node heard directly on the radio. Entries are added
//! whenever a frame from a new source is decoded and removed only when a
//! link-layer acknowledgement to that node times out; there is no age-based
//! expiry.

use super::address::NicAddr;
use std::collections::BTreeMap;
use std::time::Duration;

/// A directly reachable node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    /// Neighbour's address
    pub addr: NicAddr,
    /// When the neighbour was first heard since it was last evicted
    pub first_heard: Duration,
    /// When a frame from this neighbour was last decoded
    pub last_heard: Duration,
    /// Number of frames decoded from this neighbour
    pub frames_heard: u64,
}

impl Neighbor {
    fn new(addr: NicAddr, now: Duration) -> Self {
        Self {
            addr,
            first_heard: now,
            last_heard: now,
            frames_heard: 1,
        }
    }

    /// Time since the neighbour was last heard
    pub fn silent_for(&self, now: Duration) -> Duration {
        now.saturating_sub(self.last_heard)
    }
}

/// Set of one-hop neighbours, iterated in address order
#[derive(Debug, Clone, Default)]
pub struct NeighborTable {
    neighbors: BTreeMap<NicAddr, Neighbor>,
}

impl NeighborTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame heard from `addr`. Returns true if it is a new neighbour.
    pub fn heard(&mut self, addr: NicAddr, now: Duration) -> bool {
        match self.neighbors.get_mut(&addr) {
            Some(neighbor) => {
                neighbor.last_heard = now;
                neighbor.frames_heard += 1;
                false
            }
            None => {
                self.neighbors.insert(addr, Neighbor::new(addr, now));
                true
            }
        }
    }

    /// Evict a neighbour. Returns the entry if it was present.
    pub fn remove(&mut self, addr: &NicAddr) -> Option<Neighbor> {
        self.neighbors.remove(addr)
    }

    /// Check whether `addr` is a neighbour
    pub fn contains(&self, addr: &NicAddr) -> bool {
        self.neighbors.contains_key(addr)
    }

    /// Get a neighbour by address
    pub fn get(&self, addr: &NicAddr) -> Option<&Neighbor> {
        self.neighbors.get(addr)
    }

    /// Neighbour addresses in ascending order
    pub fn addrs(&self) -> impl Iterator<Item = NicAddr> + '_ {
        self.neighbors.keys().copied()
    }

    /// Get neighbour count
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}
