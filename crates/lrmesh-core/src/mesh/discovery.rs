//! Route discovery and link reversal
//!
//! When a message has no candidate next hop the node either polls for
//! neighbours (SOUND_OFF, answered with ONE_TWO) or, if it has neighbours,
//! optimistically treats all of them as candidates and floods a
//! FULL_REVERSAL naming the destination.
//!
//! A node hearing FULL_REVERSAL(D) drops the announcer as a candidate for D.
//! If that leaves it with no candidates it reverses too: it adopts its own
//! neighbours as candidates and re-announces. A node that still has
//! candidates is a sink for D and stays quiet. D itself answers with PRESENT
//! so that its neighbours re-learn it as a direct route.
//!
//! Propagation can oscillate under churn. Each node re-announces a given
//! destination at most once per holdoff period; its table is still updated.

use super::address::NicAddr;
use super::frame::LinkFrameType;
use super::node::MeshNode;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// What a discovery attempt sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryAction {
    /// No neighbours known; polled for them
    SoundOff,
    /// Seeded candidates from the neighbour set and announced a reversal
    FullReversal,
}

/// How a received FULL_REVERSAL was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReversalOutcome {
    /// This node is the named destination and announced itself
    Present,
    /// Candidates remain; not propagated
    Sink,
    /// No candidates remained; re-seeded and re-announced
    Propagated,
    /// Re-seeded, but announced too recently to announce again
    Suppressed,
}

/// Per-destination reversal rate limiting
#[derive(Debug, Clone)]
pub struct Discovery {
    last_announced: BTreeMap<NicAddr, Duration>,
    holdoff: Duration,
}

impl Discovery {
    pub fn new(holdoff: Duration) -> Self {
        Self {
            last_announced: BTreeMap::new(),
            holdoff,
        }
    }

    /// Record an announcement for `destination` sent at `now`
    pub fn note_announced(&mut self, destination: NicAddr, now: Duration) {
        self.last_announced.insert(destination, now);
    }

    /// Check whether `destination` may be announced again at `now`
    pub fn may_announce(&self, destination: &NicAddr, now: Duration) -> bool {
        match self.last_announced.get(destination) {
            Some(last) => now.saturating_sub(*last) >= self.holdoff,
            None => true,
        }
    }
}

impl MeshNode {
    /// Try to find a route to `destination`
    pub(super) fn start_discovery(
        &mut self,
        destination: NicAddr,
        now: Duration,
    ) -> DiscoveryAction {
        if self.neighbors.is_empty() {
            debug!("{}: no neighbours, sounding off", self.addr);
            if self.send_link(NicAddr::BROADCAST, LinkFrameType::SoundOff, "") {
                self.stats.sound_offs_sent += 1;
            }
            return DiscoveryAction::SoundOff;
        }

        self.routes.seed(destination, self.neighbors.addrs().collect::<Vec<_>>());
        info!("{}: no route to {}, announcing full reversal", self.addr, destination);
        self.announce_reversal(destination, now);
        DiscoveryAction::FullReversal
    }

    fn announce_reversal(&mut self, destination: NicAddr, now: Duration) {
        let body = destination.to_string();
        if self.send_link(NicAddr::BROADCAST, LinkFrameType::FullReversal, body) {
            self.stats.reversals_sent += 1;
        }
        self.discovery.note_announced(destination, now);
    }

    /// Handle FULL_REVERSAL(`destination`) heard from `sender`
    pub(super) fn on_full_reversal(
        &mut self,
        sender: NicAddr,
        destination: NicAddr,
        now: Duration,
    ) -> ReversalOutcome {
        self.routes.remove_candidate(&destination, &sender);

        if destination == self.addr {
            debug!("{}: reversal names us, announcing presence", self.addr);
            self.send_link(NicAddr::BROADCAST, LinkFrameType::Present, "");
            return ReversalOutcome::Present;
        }

        if self.routes.has_route(&destination) {
            debug!("{}: sink for {} after reversal from {}", self.addr, destination, sender);
            return ReversalOutcome::Sink;
        }

        self.routes.seed(destination, self.neighbors.addrs().collect::<Vec<_>>());
        if !self.discovery.may_announce(&destination, now) {
            debug!("{}: reversal for {} held off", self.addr, destination);
            return ReversalOutcome::Suppressed;
        }

        info!("{}: lost all routes to {}, propagating reversal", self.addr, destination);
        self.announce_reversal(destination, now);
        ReversalOutcome::Propagated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::config::NodeConfig;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn n(i: u32) -> NicAddr {
        NicAddr::from_index(i)
    }

    fn node() -> MeshNode {
        MeshNode::new(n(1), NodeConfig::default()).unwrap()
    }

    #[test]
    fn test_holdoff() {
        let mut d = Discovery::new(ms(10));
        assert!(d.may_announce(&n(5), ms(0)));
        d.note_announced(n(5), ms(0));
        assert!(!d.may_announce(&n(5), ms(9)));
        assert!(d.may_announce(&n(5), ms(10)));
        assert!(d.may_announce(&n(6), ms(1)));
    }

    #[test]
    fn test_discovery_without_neighbours_sounds_off() {
        let mut node = node();
        assert_eq!(node.start_discovery(n(9), ms(0)), DiscoveryAction::SoundOff);
        assert_eq!(node.stats.sound_offs_sent, 1);
        assert!(!node.routes.has_route(&n(9)));
    }

    #[test]
    fn test_discovery_seeds_from_neighbours() {
        let mut node = node();
        node.neighbors.heard(n(3), ms(0));
        node.neighbors.heard(n(2), ms(0));

        assert_eq!(node.start_discovery(n(9), ms(0)), DiscoveryAction::FullReversal);
        assert_eq!(node.routes.candidates(&n(9)).collect::<Vec<_>>(), vec![n(2), n(3)]);
        assert_eq!(node.stats.reversals_sent, 1);
    }

    #[test]
    fn test_sink_does_not_propagate() {
        let mut node = node();
        node.neighbors.heard(n(2), ms(0));
        node.neighbors.heard(n(3), ms(0));
        node.routes.seed(n(9), [n(2), n(3)]);

        assert_eq!(node.on_full_reversal(n(2), n(9), ms(0)), ReversalOutcome::Sink);
        assert_eq!(node.routes.candidates(&n(9)).collect::<Vec<_>>(), vec![n(3)]);
        assert_eq!(node.stats.reversals_sent, 0);
        assert_eq!(node.link.queue_len(), 0);
    }

    #[test]
    fn test_empty_set_propagates_once() {
        let mut node = node();
        node.neighbors.heard(n(2), ms(0));
        node.neighbors.heard(n(3), ms(0));
        node.routes.seed(n(9), [n(2)]);

        assert_eq!(node.on_full_reversal(n(2), n(9), ms(0)), ReversalOutcome::Propagated);
        // Re-seeded with every neighbour, announcer included
        assert_eq!(node.routes.candidates(&n(9)).collect::<Vec<_>>(), vec![n(2), n(3)]);

        node.routes.seed(n(9), [n(3)]);
        assert_eq!(node.on_full_reversal(n(3), n(9), ms(5)), ReversalOutcome::Suppressed);
        assert!(node.routes.has_route(&n(9)));
        assert_eq!(node.stats.reversals_sent, 1);
    }

    #[test]
    fn test_destination_announces_presence() {
        let mut node = node();
        node.neighbors.heard(n(2), ms(0));
        assert_eq!(node.on_full_reversal(n(2), n(1), ms(0)), ReversalOutcome::Present);
        assert_eq!(node.link.queue_len(), 1);
        assert_eq!(node.stats.reversals_sent, 0);
    }
}
