//! A single mesh node
//!
//! [`MeshNode`] owns every table the protocol needs: neighbours, routes,
//! both delivery engines and the discovery holdoff. The host calls three
//! things on it: [`MeshNode::on_receive`] for each frame heard on the radio,
//! [`MeshNode::tick`] to run timers and transmit, and
//! [`MeshNode::originate`] to send application payloads. Every handler runs
//! to completion and takes the current time as an argument.
//!
//! ## Example
//!
//! ```rust
//! use lrmesh_core::mesh::{CaptureRadio, MeshNode, NicAddr, NodeConfig};
//! use std::time::Duration;
//!
//! let mut a = MeshNode::new(NicAddr::from_index(1), NodeConfig::default()).unwrap();
//! let mut radio = CaptureRadio::new(1500);
//!
//! a.originate(NicAddr::BROADCAST, "hello", Duration::ZERO).unwrap();
//! a.tick(Duration::ZERO, &mut radio);
//! assert_eq!(radio.take().len(), 1);
//! ```

use super::address::NicAddr;
use super::config::NodeConfig;
use super::discovery::Discovery;
use super::frame::{LinkFrame, LinkFrameType, NetworkFrame, NetworkFrameType, SeqNo};
use super::link::LinkLayer;
use super::neighbor::NeighborTable;
use super::network::NetworkLayer;
use super::routing::{Route, RoutingTable};
use super::traits::{AppEvent, MeshError, MeshNetwork, MeshResult, MeshStats, Radio};
use std::time::Duration;
use tracing::{debug, info};

/// Per-node protocol state
#[derive(Debug, Clone)]
pub struct MeshNode {
    pub(super) addr: NicAddr,
    pub(super) config: NodeConfig,
    pub(super) neighbors: NeighborTable,
    pub(super) routes: RoutingTable,
    pub(super) link: LinkLayer,
    pub(super) network: NetworkLayer,
    pub(super) discovery: Discovery,
    pub(super) events: Vec<AppEvent>,
    pub(super) stats: MeshStats,
    next_heartbeat: Option<Duration>,
}

impl MeshNode {
    /// Create a node with fresh tables
    pub fn new(addr: NicAddr, config: NodeConfig) -> MeshResult<Self> {
        config.validate()?;
        if addr.is_broadcast() {
            return Err(MeshError::Config(
                "the broadcast address cannot identify a node".into(),
            ));
        }
        Ok(Self::fresh(addr, config, MeshStats::default()))
    }

    fn fresh(addr: NicAddr, config: NodeConfig, stats: MeshStats) -> Self {
        Self {
            addr,
            neighbors: NeighborTable::new(),
            routes: RoutingTable::new(),
            link: LinkLayer::new(addr, &config),
            network: NetworkLayer::new(&config),
            discovery: Discovery::new(config.reversal_holdoff()),
            events: Vec::new(),
            stats,
            next_heartbeat: None,
            config,
        }
    }

    /// Throw away all protocol state, as a power cycle would.
    ///
    /// Address, configuration and the cumulative statistics survive;
    /// tables, queues, sequence counters and undrained events do not.
    pub fn reboot(&mut self) {
        info!("{}: rebooting", self.addr);
        let stats = std::mem::take(&mut self.stats);
        *self = Self::fresh(self.addr, self.config.clone(), stats);
    }

    /// This node's address
    pub fn addr(&self) -> NicAddr {
        self.addr
    }

    /// Node configuration
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// One-hop neighbours
    pub fn neighbor_table(&self) -> &NeighborTable {
        &self.neighbors
    }

    /// Candidate next hops per destination
    pub fn routing_table(&self) -> &RoutingTable {
        &self.routes
    }

    /// Link-layer engine
    pub fn link_layer(&self) -> &LinkLayer {
        &self.link
    }

    /// Network-layer engine
    pub fn network_layer(&self) -> &NetworkLayer {
        &self.network
    }

    /// Notifications not yet drained
    pub fn events(&self) -> &[AppEvent] {
        &self.events
    }

    /// Send `payload` to `destination` (or to every neighbour for broadcast).
    ///
    /// Returns the network sequence number. Fails if the payload cannot fit
    /// in one radio frame or the send queue is full. A payload addressed to
    /// this node is delivered to it directly.
    pub fn originate(
        &mut self,
        destination: NicAddr,
        payload: &str,
        now: Duration,
    ) -> MeshResult<SeqNo> {
        let size = LinkFrame::content_size_bound(NetworkFrame::size_bound(payload.len()));
        if size > self.config.max_frame_size {
            return Err(MeshError::FrameTooLarge {
                size,
                max: self.config.max_frame_size,
            });
        }

        if destination == self.addr {
            let frame = self.network.new_frame(
                self.addr,
                destination,
                NetworkFrameType::Content,
                self.config.default_hop_limit,
                payload,
            );
            debug!("{}: loopback seq {}", self.addr, frame.seq);
            self.stats.delivered += 1;
            self.events.push(AppEvent::Delivered {
                source: self.addr,
                seq: frame.seq,
                payload: frame.body,
            });
            return Ok(frame.seq);
        }

        if !self.network.has_capacity() {
            return Err(MeshError::QueueFull);
        }
        let frame = self.network.new_frame(
            self.addr,
            destination,
            NetworkFrameType::Content,
            self.config.default_hop_limit,
            payload,
        );
        let seq = frame.seq;
        self.network.enqueue(frame, now)?;
        debug!("{}: originated seq {} to {}", self.addr, seq, destination);
        Ok(seq)
    }

    /// Handle bytes heard on the radio. Malformed frames are counted and dropped.
    pub fn on_receive(&mut self, bytes: &[u8], now: Duration) {
        self.stats.bytes_rx += bytes.len() as u64;
        let frame = match LinkFrame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                self.drop_malformed(&e);
                return;
            }
        };

        // Our own transmissions echoed back by the medium
        if frame.source == self.addr {
            return;
        }

        self.stats.frames_rx += 1;
        debug!("{}: rx {}", self.addr, frame.to_wire());
        self.on_link_frame(frame, now);
    }

    /// Run timeouts, heartbeat and both send queues
    pub fn tick(&mut self, now: Duration, radio: &mut dyn Radio) {
        self.expire_link(now);
        self.expire_network(now);
        self.heartbeat(now);
        self.dispatch_network(now);
        let max_frame_size = self.config.max_frame_size;
        self.link.dispatch(now, radio, max_frame_size, &mut self.stats);
    }

    fn heartbeat(&mut self, now: Duration) {
        let Some(interval) = self.config.heartbeat_interval() else {
            return;
        };
        let due = self.next_heartbeat.unwrap_or(now);
        if due <= now {
            self.send_link(NicAddr::BROADCAST, LinkFrameType::Pulse, "");
            self.next_heartbeat = Some(now + interval);
        }
    }

    /// Earliest time `tick` has something to do.
    ///
    /// `Duration::ZERO` means frames are already queued for transmission.
    pub fn next_wakeup(&self) -> Option<Duration> {
        if self.link.queue_len() > 0 {
            return Some(Duration::ZERO);
        }
        [
            self.link.next_deadline(),
            self.network.next_wakeup(),
            self.config.heartbeat_interval().map(|_| self.next_heartbeat.unwrap_or_default()),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Drain application notifications
    pub fn take_events(&mut self) -> Vec<AppEvent> {
        std::mem::take(&mut self.events)
    }

    /// Counters, with current table sizes filled in
    pub fn stats(&self) -> MeshStats {
        MeshStats {
            neighbor_count: self.neighbors.len(),
            route_count: self.routes.len(),
            ..self.stats.clone()
        }
    }
}

impl MeshNetwork for MeshNode {
    fn local_addr(&self) -> NicAddr {
        self.addr
    }

    fn neighbors(&self) -> Vec<NicAddr> {
        self.neighbors.addrs().collect()
    }

    fn route(&self, dest: NicAddr) -> Option<Route> {
        self.routes.route(&dest)
    }

    fn originate(&mut self, dest: NicAddr, payload: &str, now: Duration) -> MeshResult<SeqNo> {
        MeshNode::originate(self, dest, payload, now)
    }

    fn on_receive(&mut self, bytes: &[u8], now: Duration) {
        MeshNode::on_receive(self, bytes, now)
    }

    fn tick(&mut self, now: Duration, radio: &mut dyn Radio) {
        MeshNode::tick(self, now, radio)
    }

    fn next_wakeup(&self) -> Option<Duration> {
        MeshNode::next_wakeup(self)
    }

    fn take_events(&mut self) -> Vec<AppEvent> {
        MeshNode::take_events(self)
    }

    fn stats(&self) -> MeshStats {
        MeshNode::stats(self)
    }
}
