//! Destination-oriented routing state
//!
//! The routing table maps each destination to the set of neighbours believed
//! to lead towards it. Sets are never ranked: any candidate is a valid next
//! hop, and link reversal keeps them honest by removing neighbours that
//! announce a dead route or fail to acknowledge a frame.
//!
//! Candidate selection is deterministic: the destination itself when it is
//! a candidate (a direct neighbour), otherwise the smallest address.

use super::address::NicAddr;
use super::frame::SeqNo;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

/// Snapshot of the route to one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination address
    pub destination: NicAddr,
    /// Hop that `next_hop()` would pick right now
    pub next_hop: NicAddr,
    /// Every candidate next hop, ascending
    pub candidates: Vec<NicAddr>,
}

impl Route {
    /// Check if the destination is reached in a single hop
    pub fn is_direct(&self) -> bool {
        self.next_hop == self.destination
    }
}

/// Candidate next hops per destination
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: BTreeMap<NicAddr, BTreeSet<NicAddr>>,
}

impl RoutingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidate next hops for `destination`, ascending
    pub fn candidates(&self, destination: &NicAddr) -> impl Iterator<Item = NicAddr> + '_ {
        self.routes
            .get(destination)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Check if `destination` has at least one candidate
    pub fn has_route(&self, destination: &NicAddr) -> bool {
        self.routes
            .get(destination)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    /// Check if `hop` is a candidate towards `destination`
    pub fn is_candidate(&self, destination: &NicAddr, hop: &NicAddr) -> bool {
        self.routes
            .get(destination)
            .map(|set| set.contains(hop))
            .unwrap_or(false)
    }

    /// Pick the next hop towards `destination`
    pub fn next_hop(&self, destination: &NicAddr) -> Option<NicAddr> {
        let set = self.routes.get(destination)?;
        if set.contains(destination) {
            Some(*destination)
        } else {
            set.iter().next().copied()
        }
    }

    /// Get a snapshot of the route to `destination`
    pub fn route(&self, destination: &NicAddr) -> Option<Route> {
        let next_hop = self.next_hop(destination)?;
        Some(Route {
            destination: *destination,
            next_hop,
            candidates: self.candidates(destination).collect(),
        })
    }

    /// Add a candidate. Returns true if it was not already present.
    pub fn add_candidate(&mut self, destination: NicAddr, hop: NicAddr) -> bool {
        self.routes.entry(destination).or_default().insert(hop)
    }

    /// A node heard directly is its own next hop
    pub fn learn_self_route(&mut self, addr: NicAddr) -> bool {
        self.add_candidate(addr, addr)
    }

    /// Remove a candidate. Returns true if it was present.
    pub fn remove_candidate(&mut self, destination: &NicAddr, hop: &NicAddr) -> bool {
        let Some(set) = self.routes.get_mut(destination) else {
            return false;
        };
        let removed = set.remove(hop);
        if set.is_empty() {
            self.routes.remove(destination);
        }
        removed
    }

    /// Replace the candidates for `destination` with `hops`
    pub fn seed(&mut self, destination: NicAddr, hops: impl IntoIterator<Item = NicAddr>) {
        let set: BTreeSet<NicAddr> = hops.into_iter().collect();
        if set.is_empty() {
            self.routes.remove(&destination);
        } else {
            self.routes.insert(destination, set);
        }
    }

    /// Remove `hop` as a candidate for every destination.
    /// Returns the number of destinations that lost it.
    pub fn purge_next_hop(&mut self, hop: &NicAddr) -> usize {
        let mut affected = 0;
        self.routes.retain(|_, set| {
            if set.remove(hop) {
                affected += 1;
            }
            !set.is_empty()
        });
        affected
    }

    /// Destinations with at least one candidate, ascending
    pub fn destinations(&self) -> impl Iterator<Item = NicAddr> + '_ {
        self.routes.keys().copied()
    }

    /// All routes, ascending by destination
    pub fn all(&self) -> Vec<Route> {
        self.routes
            .keys()
            .filter_map(|dest| self.route(dest))
            .collect()
    }

    /// Number of reachable destinations
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Identity of a delivered network frame.
///
/// The body is part of the key: a rebooted node restarts its sequence
/// numbers, and its new messages must not match what it sent before.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DeliveryKey {
    source: NicAddr,
    seq: SeqNo,
    body: String,
}

impl DeliveryKey {
    fn new(source: NicAddr, seq: SeqNo, body: &str) -> Self {
        Self {
            source,
            seq,
            body: body.to_string(),
        }
    }
}

/// Recently delivered network frames, keyed by originator, sequence and body
#[derive(Debug, Clone)]
pub struct DuplicateCache {
    /// Delivered frame -> time first seen
    seen: HashMap<DeliveryKey, Duration>,
    /// TTL for cache entries
    ttl: Duration,
    /// Maximum cache size
    max_size: usize,
}

impl DuplicateCache {
    /// Create a new duplicate cache
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            seen: HashMap::new(),
            ttl,
            max_size,
        }
    }

    /// Record a frame. Returns true if it is NEW (not a duplicate).
    pub fn check_and_add(
        &mut self,
        source: NicAddr,
        seq: SeqNo,
        body: &str,
        now: Duration,
    ) -> bool {
        let key = DeliveryKey::new(source, seq, body);
        if self.is_fresh(&key, now) {
            return false;
        }

        if self.seen.len() >= self.max_size {
            self.cleanup(now);
        }
        if self.seen.len() >= self.max_size {
            self.evict_oldest();
        }
        self.seen.insert(key, now);
        true
    }

    /// Check without recording
    pub fn is_duplicate(&self, source: NicAddr, seq: SeqNo, body: &str, now: Duration) -> bool {
        self.is_fresh(&DeliveryKey::new(source, seq, body), now)
    }

    fn is_fresh(&self, key: &DeliveryKey, now: Duration) -> bool {
        self.seen
            .get(key)
            .map(|seen| now.saturating_sub(*seen) < self.ttl)
            .unwrap_or(false)
    }

    /// Remove expired entries
    pub fn cleanup(&mut self, now: Duration) {
        let ttl = self.ttl;
        self.seen.retain(|_, seen| now.saturating_sub(*seen) < ttl);
    }

    fn evict_oldest(&mut self) {
        if let Some(key) = self
            .seen
            .iter()
            .min_by_key(|(_, seen)| **seen)
            .map(|(key, _)| key.clone())
        {
            self.seen.remove(&key);
        }
    }

    /// Number of entries in cache
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(i: u32) -> NicAddr {
        NicAddr::from_index(i)
    }

    #[test]
    fn test_next_hop_prefers_destination() {
        let mut table = RoutingTable::new();
        table.seed(n(5), [n(1), n(5), n(3)]);

        assert_eq!(table.next_hop(&n(5)), Some(n(5)));
        assert!(table.route(&n(5)).unwrap().is_direct());

        table.remove_candidate(&n(5), &n(5));
        // Smallest remaining candidate
        assert_eq!(table.next_hop(&n(5)), Some(n(1)));
    }

    #[test]
    fn test_empty_set_is_unreachable() {
        let mut table = RoutingTable::new();
        table.add_candidate(n(9), n(2));
        assert!(table.has_route(&n(9)));

        assert!(table.remove_candidate(&n(9), &n(2)));
        assert!(!table.has_route(&n(9)));
        assert_eq!(table.next_hop(&n(9)), None);
        assert!(table.is_empty());

        // Removing from an unknown destination is a no-op
        assert!(!table.remove_candidate(&n(9), &n(2)));
    }

    #[test]
    fn test_purge_next_hop_hits_every_destination() {
        let mut table = RoutingTable::new();
        table.learn_self_route(n(2));
        table.seed(n(7), [n(2), n(3)]);
        table.seed(n(8), [n(2)]);
        table.seed(n(9), [n(3)]);

        assert_eq!(table.purge_next_hop(&n(2)), 3);
        assert!(!table.has_route(&n(2)));
        assert_eq!(table.candidates(&n(7)).collect::<Vec<_>>(), vec![n(3)]);
        assert!(!table.has_route(&n(8)));
        assert!(table.has_route(&n(9)));
        assert_eq!(table.destinations().collect::<Vec<_>>(), vec![n(7), n(9)]);
    }

    #[test]
    fn test_seed_replaces() {
        let mut table = RoutingTable::new();
        table.seed(n(4), [n(1)]);
        table.seed(n(4), [n(2), n(3)]);
        assert_eq!(table.candidates(&n(4)).collect::<Vec<_>>(), vec![n(2), n(3)]);

        table.seed(n(4), std::iter::empty());
        assert!(!table.has_route(&n(4)));
    }

    #[test]
    fn test_duplicate_cache() {
        let mut cache = DuplicateCache::new(Duration::from_secs(2), 100);
        let source = n(1);
        let t0 = Duration::ZERO;

        // First frame - not duplicate
        assert!(cache.check_and_add(source, 1, "hi", t0));

        // Same frame - duplicate
        assert!(!cache.check_and_add(source, 1, "hi", t0 + Duration::from_millis(10)));

        // Different sequence or source - not duplicate
        assert!(cache.check_and_add(source, 2, "hi", t0));
        assert!(cache.check_and_add(n(2), 1, "hi", t0));

        // Expired
        assert!(cache.check_and_add(source, 1, "hi", t0 + Duration::from_secs(3)));
    }

    #[test]
    fn test_duplicate_cache_reused_sequence() {
        let mut cache = DuplicateCache::new(Duration::from_secs(2), 100);
        let t0 = Duration::ZERO;

        assert!(cache.check_and_add(n(1), 0, "before reboot", t0));
        // A restarted counter with a new body is a new message
        assert!(cache.check_and_add(n(1), 0, "after reboot", t0 + Duration::from_millis(5)));
        assert!(cache.is_duplicate(n(1), 0, "after reboot", t0 + Duration::from_millis(6)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_duplicate_cache_bounded() {
        let mut cache = DuplicateCache::new(Duration::from_secs(60), 4);
        for seq in 0..10 {
            cache.check_and_add(n(1), seq, "x", Duration::from_millis(seq as u64));
        }
        assert_eq!(cache.len(), 4);
        // The newest survive
        assert!(cache.is_duplicate(n(1), 9, "x", Duration::from_millis(10)));
        assert!(!cache.is_duplicate(n(1), 0, "x", Duration::from_millis(10)));
    }
}
