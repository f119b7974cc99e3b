//! Network-layer delivery engine
//!
//! End-to-end delivery over the routing table. Messages wait in a bounded
//! queue until a tick finds them a next hop; a message with no route is put
//! back with a retry time and triggers discovery. Locally originated unicast
//! CONTENT arms an end-to-end acknowledgement timer.
//!
//! On receipt the hop limit is decremented first. Frames for this node are
//! consumed, other frames are relayed while hops remain, and a CONTENT frame
//! that runs out of hops is answered with a NACK to its originator.

use super::address::NicAddr;
use super::config::NodeConfig;
use super::frame::{parse_acked_seq, NetworkFrame, NetworkFrameType, SeqNo};
use super::node::MeshNode;
use super::pending::{PendingAcks, PendingEntry};
use super::routing::DuplicateCache;
use super::traits::{AppEvent, MeshError, MeshResult};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A network frame waiting for a next hop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Frame to send
    pub frame: NetworkFrame,
    /// Not dispatched before this time
    pub not_before: Duration,
    /// Dispatch attempts that found no route
    pub route_attempts: u32,
}

/// Network-layer send queue, sequence counter, pending acknowledgements
/// and delivered-frame cache
#[derive(Debug, Clone)]
pub struct NetworkLayer {
    next_seq: SeqNo,
    send_queue: VecDeque<QueuedMessage>,
    max_queue_len: usize,
    pending: PendingAcks<NetworkFrame>,
    delivered: DuplicateCache,
}

impl NetworkLayer {
    /// Create an empty network layer
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            next_seq: 0,
            send_queue: VecDeque::new(),
            max_queue_len: config.max_queue_len,
            pending: PendingAcks::new(config.network_ack_timeout()),
            delivered: DuplicateCache::new(
                config.duplicate_cache_ttl(),
                config.duplicate_cache_size,
            ),
        }
    }

    /// Build a frame from this node with the next sequence number
    pub fn new_frame(
        &mut self,
        source: NicAddr,
        destination: NicAddr,
        frame_type: NetworkFrameType,
        hop_limit: u8,
        body: impl Into<String>,
    ) -> NetworkFrame {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        NetworkFrame::new(source, seq, destination, frame_type, hop_limit, body)
    }

    /// Check whether another message fits in the queue
    pub fn has_capacity(&self) -> bool {
        self.send_queue.len() < self.max_queue_len
    }

    /// Queue a frame for dispatch at or after `now`
    pub fn enqueue(&mut self, frame: NetworkFrame, now: Duration) -> MeshResult<()> {
        if !self.has_capacity() {
            return Err(MeshError::QueueFull);
        }
        self.send_queue.push_back(QueuedMessage {
            frame,
            not_before: now,
            route_attempts: 0,
        });
        Ok(())
    }

    /// Put a message that found no route back at the tail
    pub fn requeue(&mut self, mut message: QueuedMessage, retry_at: Duration) {
        message.not_before = retry_at;
        self.send_queue.push_back(message);
    }

    /// Remove every message due at `now`, in queue order
    pub fn drain_ready(&mut self, now: Duration) -> Vec<QueuedMessage> {
        let (ready, waiting): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.send_queue)
            .into_iter()
            .partition(|m| m.not_before <= now);
        self.send_queue = waiting;
        ready.into()
    }

    /// Start waiting for the end-to-end ACK of a locally originated frame
    pub fn register(&mut self, frame: NetworkFrame, next_hop: NicAddr, now: Duration) {
        self.pending.register(frame.seq, frame, next_hop, now);
    }

    /// Handle an ACK from `from`; only the frame's destination may clear it
    pub fn on_ack(&mut self, from: NicAddr, seq: SeqNo) -> Option<PendingEntry<NetworkFrame>> {
        self.pending
            .acknowledge_if(seq, |entry| entry.item.destination == from)
    }

    /// Handle a NACK; any relay on the path may send one
    pub fn on_nack(&mut self, seq: SeqNo) -> Option<PendingEntry<NetworkFrame>> {
        self.pending.acknowledge(seq)
    }

    /// Remove every unacknowledged frame whose deadline has passed
    pub fn expire(&mut self, now: Duration) -> Vec<(SeqNo, PendingEntry<NetworkFrame>)> {
        self.pending.expire(now)
    }

    /// Record a CONTENT frame as delivered. Returns false if it already was.
    pub fn first_delivery(&mut self, frame: &NetworkFrame, now: Duration) -> bool {
        self.delivered
            .check_and_add(frame.source, frame.seq, &frame.body, now)
    }

    /// Earliest time a queued message or pending entry needs attention
    pub fn next_wakeup(&self) -> Option<Duration> {
        let queued = self.send_queue.iter().map(|m| m.not_before).min();
        match (queued, self.pending.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Messages waiting for dispatch
    pub fn queue_len(&self) -> usize {
        self.send_queue.len()
    }

    /// Frames awaiting end-to-end acknowledgement
    pub fn pending(&self) -> &PendingAcks<NetworkFrame> {
        &self.pending
    }
}

impl MeshNode {
    /// Hand a frame to the network layer. Frames addressed to this node
    /// are consumed immediately.
    pub(super) fn queue_network(&mut self, frame: NetworkFrame, now: Duration) -> bool {
        if frame.destination == self.addr {
            self.on_network_frame(frame, now);
            return true;
        }
        match self.network.enqueue(frame, now) {
            Ok(()) => true,
            Err(e) => {
                debug!("{}: network frame dropped: {}", self.addr, e);
                self.stats.queue_drops += 1;
                false
            }
        }
    }

    /// Originate an ACK or NACK for `seq` back to `destination`
    fn send_network_control(
        &mut self,
        destination: NicAddr,
        frame_type: NetworkFrameType,
        seq: SeqNo,
        now: Duration,
    ) -> bool {
        let frame = self.network.new_frame(
            self.addr,
            destination,
            frame_type,
            self.config.default_hop_limit,
            seq.to_string(),
        );
        self.queue_network(frame, now)
    }

    /// Handle a network frame carried by a link CONTENT frame
    pub(super) fn on_network_frame(&mut self, mut frame: NetworkFrame, now: Duration) {
        frame.decrement_hop_limit();

        if !frame.is_for(self.addr) {
            self.relay(frame, now);
            return;
        }

        match frame.frame_type {
            NetworkFrameType::Ack => match parse_acked_seq(&frame.body) {
                Ok(seq) => {
                    if self.network.on_ack(frame.source, seq).is_some() {
                        debug!(
                            "{}: delivery of seq {} to {} confirmed",
                            self.addr, seq, frame.source
                        );
                        self.stats.acks_received += 1;
                    }
                }
                Err(e) => self.drop_malformed(&e),
            },
            NetworkFrameType::Nack => match parse_acked_seq(&frame.body) {
                Ok(seq) => {
                    if let Some(entry) = self.network.on_nack(seq) {
                        let destination = entry.item.destination;
                        self.routes.remove_candidate(&destination, &entry.next_hop);
                        self.stats.nacks_received += 1;
                        warn!(
                            "{}: received NACK for seq {} to {} via {}",
                            self.addr, seq, destination, entry.next_hop
                        );
                        self.events.push(AppEvent::Nacked { destination, seq });
                    }
                }
                Err(e) => self.drop_malformed(&e),
            },
            NetworkFrameType::Content => {
                let source = frame.source;
                if !frame.destination.is_broadcast()
                    && self.send_network_control(source, NetworkFrameType::Ack, frame.seq, now)
                {
                    self.stats.acks_sent += 1;
                }

                if self.network.first_delivery(&frame, now) {
                    debug!("{}: delivered seq {} from {}", self.addr, frame.seq, frame.source);
                    self.stats.delivered += 1;
                    self.events.push(AppEvent::Delivered {
                        source: frame.source,
                        seq: frame.seq,
                        payload: frame.body,
                    });
                } else {
                    debug!("{}: duplicate seq {} from {}", self.addr, frame.seq, frame.source);
                    self.stats.duplicates_dropped += 1;
                }
            }
        }
    }

    /// Forward a frame for someone else, or NACK it if it is out of hops
    fn relay(&mut self, frame: NetworkFrame, now: Duration) {
        if frame.hop_limit > 0 {
            if self.queue_network(frame, now) {
                self.stats.forwarded += 1;
            }
            return;
        }

        self.stats.hop_limit_exceeded += 1;
        if frame.frame_type != NetworkFrameType::Content {
            debug!("{}: {} seq {} out of hops, dropped", self.addr, frame.frame_type, frame.seq);
            return;
        }
        info!(
            "{}: seq {} from {} to {} out of hops, sending NACK",
            self.addr, frame.seq, frame.source, frame.destination
        );
        if self.send_network_control(frame.source, NetworkFrameType::Nack, frame.seq, now) {
            self.stats.nacks_sent += 1;
        }
    }

    /// Route every due message and hand it to the link layer
    pub(super) fn dispatch_network(&mut self, now: Duration) {
        for mut message in self.network.drain_ready(now) {
            let destination = message.frame.destination;
            let next_hop = if destination.is_broadcast() {
                Some(NicAddr::BROADCAST)
            } else {
                self.routes.next_hop(&destination)
            };

            let Some(next_hop) = next_hop else {
                message.route_attempts += 1;
                if let Some(limit) = self.config.route_retry_limit {
                    if message.route_attempts >= limit {
                        self.abandon(message);
                        continue;
                    }
                }
                self.start_discovery(destination, now);
                let retry_at = now + self.config.route_retry_interval();
                self.network.requeue(message, retry_at);
                continue;
            };

            let track = message.frame.source == self.addr
                && !destination.is_broadcast()
                && message.frame.frame_type == NetworkFrameType::Content;
            let frame = message.frame.clone();
            match self.link.send_content(next_hop, message.frame.clone()) {
                Ok(_) => {
                    if track {
                        self.network.register(frame, next_hop, now);
                    }
                }
                Err(e) => {
                    debug!("{}: link queue busy ({}), retrying seq {}", self.addr, e, frame.seq);
                    let retry_at = now + self.config.route_retry_interval();
                    self.network.requeue(message, retry_at);
                }
            }
        }
    }

    /// Give up on a message that never found a route
    fn abandon(&mut self, message: QueuedMessage) {
        let frame = message.frame;
        self.stats.unroutable += 1;
        warn!(
            "{}: no route to {} after {} attempts, abandoning seq {}",
            self.addr, frame.destination, message.route_attempts, frame.seq
        );
        if frame.source == self.addr && frame.frame_type == NetworkFrameType::Content {
            self.events.push(AppEvent::Unroutable {
                destination: frame.destination,
                seq: frame.seq,
            });
        }
    }

    /// Give up on deliveries whose end-to-end acknowledgement never came
    pub(super) fn expire_network(&mut self, now: Duration) {
        for (seq, entry) in self.network.expire(now) {
            let destination = entry.item.destination;
            self.routes.remove_candidate(&destination, &entry.next_hop);
            self.stats.network_timeouts += 1;
            warn!(
                "{}: network layer timeout for seq {} to {} via {}",
                self.addr, seq, destination, entry.next_hop
            );
            self.events.push(AppEvent::TimedOut { destination, seq });
        }
    }
}
