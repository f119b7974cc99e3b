//! Mesh Network Simulator
//!
//! A deterministic discrete-event harness: it plays the scheduler and the
//! broadcast medium for a set of [`MeshNode`]s.
//!
//! Each step advances simulated time by one tick and then, in order:
//! generates random test traffic, delivers every in-flight frame whose
//! propagation delay has elapsed to all live nodes within radio range of the
//! sender (minus seeded random loss), and ticks every live node, collecting
//! what it transmits. Frames a node sends in step `k` arrive no earlier than
//! step `k + 1`.
//!
//! ## Example
//!
//! ```rust
//! use lrmesh_core::mesh::simulation::{MeshSimulator, SimConfig};
//!
//! // Three nodes in a line, each only hearing its direct neighbours
//! let config = SimConfig::default().with_node_count(3);
//! let mut sim = MeshSimulator::new(config).unwrap();
//!
//! sim.send_message(0, "Hello!", Some(2));
//! sim.run(500);
//!
//! let stats = sim.stats();
//! println!("Delivery rate: {:.1}%", stats.delivery_rate() * 100.0);
//! ```

use super::address::NicAddr;
use super::config::NodeConfig;
use super::frame::SeqNo;
use super::node::MeshNode;
use super::traits::{AppEvent, CaptureRadio, MeshResult, MeshStats};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info};

/// Node position in 2D space (meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodePosition {
    pub x: f64,
    pub y: f64,
}

impl NodePosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Distance to another node in meters
    pub fn distance_to(&self, other: &NodePosition) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// How nodes are laid out at start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// Along the x axis, `spacing` apart
    Line,
    /// Row-major on a square grid, `spacing` apart
    Grid,
    /// Uniformly at random in a square of side `spacing * sqrt(node_count)`
    Random,
}

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of nodes in the simulation
    pub node_count: usize,
    /// Initial layout
    pub placement: Placement,
    /// Distance between adjacent nodes (meters)
    pub spacing: f64,
    /// Maximum distance a frame travels (meters)
    pub radio_range: f64,
    /// Probability that a frame is lost on its way to one receiver
    pub loss_probability: f64,
    /// Time from transmission to reception (microseconds)
    pub propagation_delay_us: u64,
    /// Simulated time per step (microseconds)
    pub tick_us: u64,
    /// Random seed for reproducibility
    pub seed: u64,
    /// Chance per node per step of sending a test message to a random peer
    pub message_rate: f64,
    /// Most recent events kept by `events()`; 0 disables the log
    pub event_log_limit: usize,
    /// Protocol configuration shared by every node
    pub node: NodeConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            node_count: 5,
            placement: Placement::Line,
            spacing: 100.0,
            radio_range: 150.0, // direct neighbours only on a line
            loss_probability: 0.0,
            propagation_delay_us: 100,
            tick_us: 1000, // 1 ms
            seed: 42,
            message_rate: 0.0,
            event_log_limit: 10_000,
            node: NodeConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn with_node_count(mut self, count: usize) -> Self {
        self.node_count = count;
        self
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_spacing(mut self, spacing: f64) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_radio_range(mut self, range: f64) -> Self {
        self.radio_range = range;
        self
    }

    pub fn with_loss(mut self, probability: f64) -> Self {
        self.loss_probability = probability;
        self
    }

    pub fn with_propagation_delay(mut self, delay: Duration) -> Self {
        self.propagation_delay_us = delay.as_micros() as u64;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick_us = tick.as_micros() as u64;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_message_rate(mut self, rate: f64) -> Self {
        self.message_rate = rate;
        self
    }

    pub fn with_event_log_limit(mut self, limit: usize) -> Self {
        self.event_log_limit = limit;
        self
    }

    pub fn with_node_config(mut self, node: NodeConfig) -> Self {
        self.node = node;
        self
    }

    pub fn tick(&self) -> Duration {
        Duration::from_micros(self.tick_us.max(1))
    }

    pub fn propagation_delay(&self) -> Duration {
        Duration::from_micros(self.propagation_delay_us)
    }
}

/// A frame travelling through the simulated medium
#[derive(Debug, Clone)]
struct InFlightFrame {
    data: Vec<u8>,
    source_idx: usize,
    /// Sender position at transmission time
    source_pos: NodePosition,
    arrives_at: Duration,
}

/// Message tracking for delivery statistics
#[derive(Debug, Clone)]
struct TrackedMessage {
    /// Intended destination (None = broadcast)
    dest_idx: Option<usize>,
    sent_at: Duration,
    delivered: bool,
}

/// Simulation statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimStats {
    /// Messages handed to a node by `send_message` or traffic generation
    pub messages_sent: u64,
    /// Messages that reached their destination (first delivery only)
    pub messages_delivered: u64,
    /// Frames put on the medium
    pub frames_transmitted: u64,
    /// Frame receptions (one per receiver)
    pub frames_received: u64,
    /// Frame receptions dropped by random loss
    pub frames_lost: u64,
    /// End-to-end timeouts reported to senders
    pub timeouts: u64,
    /// NACKs reported to senders
    pub nacks: u64,
    /// Messages abandoned for lack of a route
    pub unroutable: u64,
    /// Sum of first-delivery latencies
    total_latency: Duration,
}

impl SimStats {
    /// Message delivery rate (0.0 - 1.0)
    pub fn delivery_rate(&self) -> f64 {
        if self.messages_sent == 0 {
            0.0
        } else {
            self.messages_delivered as f64 / self.messages_sent as f64
        }
    }

    /// Mean time from `send_message` to first delivery
    pub fn avg_latency(&self) -> Option<Duration> {
        if self.messages_delivered == 0 {
            None
        } else {
            Some(self.total_latency / self.messages_delivered as u32)
        }
    }
}

/// Simulation events for logging
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SimEvent {
    NodeJoined { node_idx: usize, addr: NicAddr, position: NodePosition },
    MessageSent { node_idx: usize, seq: SeqNo, dest: Option<usize> },
    FrameTransmitted { node_idx: usize, size: usize },
    FrameLost { from_idx: usize, to_idx: usize },
    Application { node_idx: usize, at: Duration, event: AppEvent },
    NodeKilled { node_idx: usize },
    NodeRevived { node_idx: usize },
    NodeMoved { node_idx: usize, position: NodePosition },
}

/// Bounded event history, oldest dropped first
#[derive(Debug)]
struct EventLog {
    events: VecDeque<SimEvent>,
    limit: usize,
}

impl EventLog {
    fn new(limit: usize) -> Self {
        Self {
            events: VecDeque::new(),
            limit,
        }
    }

    fn push(&mut self, event: SimEvent) {
        if self.limit == 0 {
            return;
        }
        if self.events.len() >= self.limit {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Simulated node wrapper
#[derive(Debug)]
struct SimNode {
    node: MeshNode,
    position: NodePosition,
    alive: bool,
    radio: CaptureRadio,
    /// Every application event this node produced
    app_log: Vec<AppEvent>,
}

/// Multi-node mesh network simulator
#[derive(Debug)]
pub struct MeshSimulator {
    config: SimConfig,
    nodes: Vec<SimNode>,
    index: HashMap<NicAddr, usize>,
    /// Frames currently in flight
    in_flight: Vec<InFlightFrame>,
    /// (sender index, seq) -> delivery tracking
    tracked_messages: HashMap<(usize, SeqNo), TrackedMessage>,
    step_count: u64,
    rng: StdRng,
    stats: SimStats,
    event_log: EventLog,
}

impl MeshSimulator {
    /// Create a new simulator with the given configuration
    pub fn new(config: SimConfig) -> MeshResult<Self> {
        let mut sim = Self {
            nodes: Vec::with_capacity(config.node_count),
            index: HashMap::new(),
            in_flight: Vec::new(),
            tracked_messages: HashMap::new(),
            step_count: 0,
            rng: StdRng::seed_from_u64(config.seed),
            stats: SimStats::default(),
            event_log: EventLog::new(config.event_log_limit),
            config,
        };

        sim.initialize_nodes()?;
        Ok(sim)
    }

    fn initialize_nodes(&mut self) -> MeshResult<()> {
        let count = self.config.node_count;
        let spacing = self.config.spacing;
        let cols = (count as f64).sqrt().ceil().max(1.0) as usize;
        let side = spacing * (count as f64).sqrt();

        for i in 0..count {
            let position = match self.config.placement {
                Placement::Line => NodePosition::new(i as f64 * spacing, 0.0),
                Placement::Grid => {
                    NodePosition::new((i % cols) as f64 * spacing, (i / cols) as f64 * spacing)
                }
                Placement::Random => {
                    NodePosition::new(self.rng.gen::<f64>() * side, self.rng.gen::<f64>() * side)
                }
            };
            let addr = NicAddr::from_index(i as u32 + 1);
            let node = MeshNode::new(addr, self.config.node.clone())?;

            self.event_log.push(SimEvent::NodeJoined {
                node_idx: i,
                addr,
                position,
            });
            self.index.insert(addr, i);
            self.nodes.push(SimNode {
                node,
                position,
                alive: true,
                radio: CaptureRadio::new(self.config.node.max_frame_size),
                app_log: Vec::new(),
            });
        }
        debug!("initialized {} nodes", self.nodes.len());
        Ok(())
    }

    /// Current simulated time
    pub fn now(&self) -> Duration {
        Duration::from_micros(self.config.tick_us.max(1).saturating_mul(self.step_count))
    }

    /// Run one simulation step
    pub fn step(&mut self) {
        self.step_count += 1;
        let now = self.now();

        // 1. Generate test traffic
        self.generate_messages(now);

        // 2. Deliver frames whose propagation delay has elapsed
        self.propagate_frames(now);

        // 3. Run every live node and collect its transmissions
        self.process_nodes(now);
    }

    fn generate_messages(&mut self, now: Duration) {
        if self.config.message_rate <= 0.0 || self.nodes.len() < 2 {
            return;
        }
        for i in 0..self.nodes.len() {
            if !self.nodes[i].alive || self.rng.gen::<f64>() >= self.config.message_rate {
                continue;
            }
            let mut dest = self.rng.gen_range(0..self.nodes.len() - 1);
            if dest >= i {
                dest += 1;
            }
            let msg = format!("msg from {} at {:?}", i, now);
            self.send_message(i, &msg, Some(dest));
        }
    }

    fn propagate_frames(&mut self, now: Duration) {
        let (arrived, still_flying): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(|f| f.arrives_at <= now);
        self.in_flight = still_flying;

        for frame in arrived {
            self.deliver_frame(&frame, now);
        }
    }

    /// Deliver a frame to every live node in range of where it was sent
    fn deliver_frame(&mut self, frame: &InFlightFrame, now: Duration) {
        let range = self.config.radio_range;
        let loss = self.config.loss_probability;

        for i in 0..self.nodes.len() {
            if i == frame.source_idx || !self.nodes[i].alive {
                continue;
            }
            if frame.source_pos.distance_to(&self.nodes[i].position) > range {
                continue;
            }
            if loss > 0.0 && self.rng.gen::<f64>() < loss {
                self.stats.frames_lost += 1;
                self.event_log.push(SimEvent::FrameLost {
                    from_idx: frame.source_idx,
                    to_idx: i,
                });
                continue;
            }

            self.stats.frames_received += 1;
            self.nodes[i].node.on_receive(&frame.data, now);
        }
    }

    fn process_nodes(&mut self, now: Duration) {
        let delay = self.config.propagation_delay();

        for i in 0..self.nodes.len() {
            if !self.nodes[i].alive {
                continue;
            }

            let sim_node = &mut self.nodes[i];
            sim_node.node.tick(now, &mut sim_node.radio);
            let source_pos = sim_node.position;
            for data in sim_node.radio.take() {
                self.stats.frames_transmitted += 1;
                self.event_log.push(SimEvent::FrameTransmitted {
                    node_idx: i,
                    size: data.len(),
                });
                self.in_flight.push(InFlightFrame {
                    data,
                    source_idx: i,
                    source_pos,
                    arrives_at: now + delay,
                });
            }
        }

        // Events raised while receiving or ticking
        for i in 0..self.nodes.len() {
            for event in self.nodes[i].node.take_events() {
                self.record_app_event(i, event, now);
            }
        }
    }

    fn record_app_event(&mut self, node_idx: usize, event: AppEvent, now: Duration) {
        match &event {
            AppEvent::Delivered { source, seq, .. } => {
                if let Some(&from_idx) = self.index.get(source) {
                    if let Some(tracked) = self.tracked_messages.get_mut(&(from_idx, *seq)) {
                        let reached = tracked.dest_idx.map(|d| d == node_idx).unwrap_or(true);
                        if reached && !tracked.delivered {
                            tracked.delivered = true;
                            self.stats.messages_delivered += 1;
                            self.stats.total_latency += now.saturating_sub(tracked.sent_at);
                        }
                    }
                }
            }
            AppEvent::Nacked { .. } => self.stats.nacks += 1,
            AppEvent::TimedOut { .. } => self.stats.timeouts += 1,
            AppEvent::Unroutable { .. } => self.stats.unroutable += 1,
        }

        self.nodes[node_idx].app_log.push(event.clone());
        self.event_log.push(SimEvent::Application {
            node_idx,
            at: now,
            event,
        });
    }

    /// Run simulation for a number of steps
    pub fn run(&mut self, steps: u64) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// Run simulation until a condition is met or max steps reached.
    /// Returns true if the condition was met.
    pub fn run_until<F>(&mut self, max_steps: u64, condition: F) -> bool
    where
        F: Fn(&Self) -> bool,
    {
        for _ in 0..max_steps {
            self.step();
            if condition(self) {
                return true;
            }
        }
        false
    }

    /// Send a message from one node to another (or broadcast).
    ///
    /// Returns the network sequence number, or `None` if either index is
    /// unknown, the sender is down, or the node refused the payload.
    pub fn send_message(
        &mut self,
        from_idx: usize,
        message: &str,
        dest: Option<usize>,
    ) -> Option<SeqNo> {
        let now = self.now();
        let dest_addr = match dest {
            Some(to_idx) => self.nodes.get(to_idx)?.node.addr(),
            None => NicAddr::BROADCAST,
        };
        let sim_node = self.nodes.get_mut(from_idx)?;
        if !sim_node.alive {
            return None;
        }

        let seq = match sim_node.node.originate(dest_addr, message, now) {
            Ok(seq) => seq,
            Err(e) => {
                debug!("node {} refused message: {}", from_idx, e);
                return None;
            }
        };

        self.stats.messages_sent += 1;
        self.tracked_messages.insert(
            (from_idx, seq),
            TrackedMessage {
                dest_idx: dest,
                sent_at: now,
                delivered: false,
            },
        );
        self.event_log.push(SimEvent::MessageSent {
            node_idx: from_idx,
            seq,
            dest,
        });

        // Loopback deliveries are raised inside originate
        for event in self.nodes[from_idx].node.take_events() {
            self.record_app_event(from_idx, event, now);
        }
        Some(seq)
    }

    /// Stop a node: it neither hears nor transmits until revived
    pub fn kill(&mut self, idx: usize) -> bool {
        match self.nodes.get_mut(idx) {
            Some(sim_node) if sim_node.alive => {
                sim_node.alive = false;
                sim_node.radio.take();
                info!("node {} killed", idx);
                self.event_log.push(SimEvent::NodeKilled { node_idx: idx });
                true
            }
            _ => false,
        }
    }

    /// Restart a dead node with empty tables
    pub fn revive(&mut self, idx: usize) -> bool {
        match self.nodes.get_mut(idx) {
            Some(sim_node) if !sim_node.alive => {
                sim_node.node.reboot();
                sim_node.alive = true;
                info!("node {} revived", idx);
                self.event_log.push(SimEvent::NodeRevived { node_idx: idx });
                true
            }
            _ => false,
        }
    }

    /// Move a node
    pub fn move_node(&mut self, idx: usize, position: NodePosition) -> bool {
        match self.nodes.get_mut(idx) {
            Some(sim_node) => {
                sim_node.position = position;
                self.event_log.push(SimEvent::NodeMoved {
                    node_idx: idx,
                    position,
                });
                true
            }
            None => false,
        }
    }

    /// Check whether a node is running
    pub fn is_alive(&self, idx: usize) -> bool {
        self.nodes.get(idx).map(|n| n.alive).unwrap_or(false)
    }

    /// Get collected statistics
    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Protocol counters of one node
    pub fn node_stats(&self, idx: usize) -> Option<MeshStats> {
        self.nodes.get(idx).map(|n| n.node.stats())
    }

    /// Protocol counters summed over all nodes
    pub fn aggregate_stats(&self) -> MeshStats {
        let mut total = MeshStats::default();
        for sim_node in &self.nodes {
            total.accumulate(&sim_node.node.stats());
        }
        total
    }

    /// Most recent simulation events, oldest first
    pub fn events(&self) -> impl Iterator<Item = &SimEvent> + '_ {
        self.event_log.events.iter()
    }

    /// Application events produced by one node, in order
    pub fn app_events(&self, idx: usize) -> &[AppEvent] {
        self.nodes
            .get(idx)
            .map(|n| n.app_log.as_slice())
            .unwrap_or(&[])
    }

    /// Payloads delivered to one node, in order
    pub fn delivered_payloads(&self, idx: usize) -> Vec<&str> {
        self.app_events(idx)
            .iter()
            .filter_map(|e| match e {
                AppEvent::Delivered { payload, .. } => Some(payload.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Get node count
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get a node
    pub fn node(&self, idx: usize) -> Option<&MeshNode> {
        self.nodes.get(idx).map(|n| &n.node)
    }

    /// Get a node's address
    pub fn addr(&self, idx: usize) -> Option<NicAddr> {
        self.nodes.get(idx).map(|n| n.node.addr())
    }

    /// Find a node by address
    pub fn index_of(&self, addr: &NicAddr) -> Option<usize> {
        self.index.get(addr).copied()
    }

    /// Get node position
    pub fn node_position(&self, idx: usize) -> Option<NodePosition> {
        self.nodes.get(idx).map(|n| n.position)
    }

    /// Get neighbour count for a node
    pub fn neighbor_count(&self, idx: usize) -> usize {
        self.nodes
            .get(idx)
            .map(|n| n.node.neighbor_table().len())
            .unwrap_or(0)
    }

    /// Get simulation step count
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Print a summary of the simulation
    pub fn print_summary(&self) {
        let mesh = self.aggregate_stats();
        println!("\n=== Mesh Simulation Summary ===");
        println!("Steps: {} ({:?} simulated)", self.step_count, self.now());
        println!("Nodes: {}", self.nodes.len());
        println!();
        println!("Messages:");
        println!("  Sent: {}", self.stats.messages_sent);
        println!("  Delivered: {}", self.stats.messages_delivered);
        println!("  Delivery rate: {:.1}%", self.stats.delivery_rate() * 100.0);
        if let Some(latency) = self.stats.avg_latency() {
            println!("  Average latency: {:?}", latency);
        }
        println!("  Timeouts: {}", self.stats.timeouts);
        println!("  NACKs: {}", self.stats.nacks);
        println!("  Unroutable: {}", self.stats.unroutable);
        println!();
        println!("Frames:");
        println!("  Transmitted: {}", self.stats.frames_transmitted);
        println!("  Received: {}", self.stats.frames_received);
        println!("  Lost: {}", self.stats.frames_lost);
        println!("  Malformed: {}", mesh.malformed);
        println!("  Reversals: {}", mesh.reversals_sent);
        println!("  Sound-offs: {}", mesh.sound_offs_sent);
        println!();
        println!("Per-node stats:");
        for (i, sim_node) in self.nodes.iter().enumerate() {
            let stats = sim_node.node.stats();
            println!(
                "  Node {:2} {}{}: TX={} RX={} fwd={} neighbors={} routes={}",
                i,
                sim_node.node.addr(),
                if sim_node.alive { "" } else { " (down)" },
                stats.frames_tx,
                stats.frames_rx,
                stats.forwarded,
                stats.neighbor_count,
                stats.route_count
            );
        }
    }

    /// Get topology as adjacency list (based on current neighbour tables)
    pub fn topology(&self) -> Vec<Vec<usize>> {
        self.nodes
            .iter()
            .map(|sim_node| {
                sim_node
                    .node
                    .neighbor_table()
                    .addrs()
                    .filter_map(|addr| self.index_of(&addr))
                    .collect()
            })
            .collect()
    }

    /// Check if two live nodes are within radio range of each other
    pub fn in_range(&self, a: usize, b: usize) -> bool {
        match (self.nodes.get(a), self.nodes.get(b)) {
            (Some(x), Some(y)) => {
                a != b
                    && x.alive
                    && y.alive
                    && x.position.distance_to(&y.position) <= self.config.radio_range
            }
            _ => false,
        }
    }

    /// Check if every live node can reach every other over radio links
    pub fn is_connected(&self) -> bool {
        let Some(start) = (0..self.nodes.len()).find(|&i| self.nodes[i].alive) else {
            return true;
        };

        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;

            for other in 0..self.nodes.len() {
                if !visited[other] && self.in_range(node, other) {
                    stack.push(other);
                }
            }
        }

        self.nodes
            .iter()
            .zip(&visited)
            .all(|(n, &v)| v || !n.alive)
    }
}
