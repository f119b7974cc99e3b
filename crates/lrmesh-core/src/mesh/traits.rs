//! Core mesh networking traits
//!
//! The protocol engine talks to the outside world through two seams: a
//! [`Radio`] it hands encoded frames to, and the [`MeshNetwork`] surface the
//! host (simulator, CLI, tests) drives it through. Time is never read from a
//! clock inside the engine; every entry point takes `now` as a `Duration`
//! since the host's epoch, so the same node runs under simulated or real time.

use super::address::NicAddr;
use super::frame::SeqNo;
use super::routing::Route;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in mesh networking operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeshError {
    /// Payload cannot fit in a single radio frame
    #[error("payload needs a {size} byte frame, radio limit is {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Send queue is at capacity
    #[error("send queue full")]
    QueueFull,

    /// Physical layer refused the frame
    #[error("radio error: {0}")]
    Radio(String),

    /// Configuration rejected by `validate()`
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for mesh operations
pub type MeshResult<T> = Result<T, MeshError>;

/// Best-effort broadcast medium
///
/// Every transmitted frame may reach any subset of the nodes in range, in
/// any order, possibly more than once. The only guarantee is the size limit.
pub trait Radio {
    /// Largest frame, in bytes, the medium will carry
    fn max_frame_size(&self) -> usize;

    /// Transmit a frame to everyone in range
    fn broadcast(&mut self, frame: &[u8]) -> MeshResult<()>;
}

/// Radio that records every frame instead of transmitting it
///
/// The simulator moves the recorded frames onto its own medium after each
/// tick.
#[derive(Debug, Clone, Default)]
pub struct CaptureRadio {
    max_frame_size: usize,
    sent: Vec<Vec<u8>>,
}

impl CaptureRadio {
    /// Create a capture radio with the given frame size limit
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            sent: Vec::new(),
        }
    }

    /// Take every frame transmitted since the last call
    pub fn take(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sent)
    }

    /// Frames transmitted and not yet taken
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }
}

impl Radio for CaptureRadio {
    fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn broadcast(&mut self, frame: &[u8]) -> MeshResult<()> {
        if frame.len() > self.max_frame_size {
            return Err(MeshError::Radio(format!(
                "{} byte frame exceeds {} byte limit",
                frame.len(),
                self.max_frame_size
            )));
        }
        self.sent.push(frame.to_vec());
        Ok(())
    }
}

/// Notification surfaced to the application layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AppEvent {
    /// A CONTENT payload arrived for this node (or for everyone)
    Delivered {
        source: NicAddr,
        seq: SeqNo,
        payload: String,
    },
    /// A relay ran out of hops and sent back a NACK
    Nacked { destination: NicAddr, seq: SeqNo },
    /// No end-to-end acknowledgement arrived in time
    TimedOut { destination: NicAddr, seq: SeqNo },
    /// No route was found after the configured number of attempts
    Unroutable { destination: NicAddr, seq: SeqNo },
}

/// The surface a host drives a mesh node through
pub trait MeshNetwork: Debug {
    /// This node's address
    fn local_addr(&self) -> NicAddr;

    /// Currently known one-hop neighbours, ascending
    fn neighbors(&self) -> Vec<NicAddr>;

    /// Route towards `dest`, if any candidate is known
    fn route(&self, dest: NicAddr) -> Option<Route>;

    /// Hand a payload to the network layer. Returns its sequence number.
    fn originate(&mut self, dest: NicAddr, payload: &str, now: Duration) -> MeshResult<SeqNo>;

    /// Send a payload to every neighbour, unacknowledged
    fn broadcast(&mut self, payload: &str, now: Duration) -> MeshResult<SeqNo> {
        self.originate(NicAddr::BROADCAST, payload, now)
    }

    /// Handle a frame heard on the radio. Malformed frames are dropped.
    fn on_receive(&mut self, bytes: &[u8], now: Duration);

    /// Run timeouts and drain the send queues onto `radio`
    fn tick(&mut self, now: Duration, radio: &mut dyn Radio);

    /// Earliest time `tick` has work to do, if any
    fn next_wakeup(&self) -> Option<Duration>;

    /// Drain application notifications
    fn take_events(&mut self) -> Vec<AppEvent>;

    /// Get statistics
    fn stats(&self) -> MeshStats;
}

/// Statistics for mesh network operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MeshStats {
    /// Frames handed to the radio
    pub frames_tx: u64,
    /// Frames heard and decoded
    pub frames_rx: u64,
    /// Bytes handed to the radio
    pub bytes_tx: u64,
    /// Bytes heard, decodable or not
    pub bytes_rx: u64,
    /// Frames dropped at receive because they did not decode
    pub malformed: u64,
    /// Frames dropped at send because they did not encode or the radio refused them
    pub send_failures: u64,
    /// Network frames relayed on behalf of other nodes
    pub forwarded: u64,
    /// Payloads delivered to the application
    pub delivered: u64,
    /// Duplicate CONTENT frames re-acknowledged but not redelivered
    pub duplicates_dropped: u64,
    /// Link and network ACKs sent
    pub acks_sent: u64,
    /// Link and network ACKs that cleared a pending entry
    pub acks_received: u64,
    /// NACKs sent on hop-limit exhaustion
    pub nacks_sent: u64,
    /// NACKs that cleared a pending entry
    pub nacks_received: u64,
    /// Frames dropped because the hop limit ran out
    pub hop_limit_exceeded: u64,
    /// Link-layer acknowledgement timeouts
    pub link_timeouts: u64,
    /// End-to-end acknowledgement timeouts
    pub network_timeouts: u64,
    /// FULL_REVERSAL frames originated or propagated
    pub reversals_sent: u64,
    /// SOUND_OFF polls sent
    pub sound_offs_sent: u64,
    /// Messages abandoned after the route retry limit
    pub unroutable: u64,
    /// Frames dropped because a send queue was full
    pub queue_drops: u64,
    /// Number of known neighbours
    pub neighbor_count: usize,
    /// Number of reachable destinations
    pub route_count: usize,
}

impl MeshStats {
    /// Add another node's counters into this one
    pub fn accumulate(&mut self, other: &MeshStats) {
        self.frames_tx += other.frames_tx;
        self.frames_rx += other.frames_rx;
        self.bytes_tx += other.bytes_tx;
        self.bytes_rx += other.bytes_rx;
        self.malformed += other.malformed;
        self.send_failures += other.send_failures;
        self.forwarded += other.forwarded;
        self.delivered += other.delivered;
        self.duplicates_dropped += other.duplicates_dropped;
        self.acks_sent += other.acks_sent;
        self.acks_received += other.acks_received;
        self.nacks_sent += other.nacks_sent;
        self.nacks_received += other.nacks_received;
        self.hop_limit_exceeded += other.hop_limit_exceeded;
        self.link_timeouts += other.link_timeouts;
        self.network_timeouts += other.network_timeouts;
        self.reversals_sent += other.reversals_sent;
        self.sound_offs_sent += other.sound_offs_sent;
        self.unroutable += other.unroutable;
        self.queue_drops += other.queue_drops;
        self.neighbor_count += other.neighbor_count;
        self.route_count += other.route_count;
    }
}
