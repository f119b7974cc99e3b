//! Link-layer delivery engine
//!
//! One-hop framing between radio neighbours. Outgoing frames wait in a
//! bounded FIFO until the next tick drains it onto the radio. A unicast
//! CONTENT frame arms an acknowledgement timer; if the neighbour never
//! answers it is evicted, dropped as a next hop for every destination, and
//! the network frame it was carrying goes back to the network layer to be
//! routed again. None of this is visible to the application.

use super::address::NicAddr;
use super::config::NodeConfig;
use super::frame::{parse_acked_seq, FrameError, LinkFrame, LinkFrameType, NetworkFrame, SeqNo};
use super::node::MeshNode;
use super::pending::{PendingAcks, PendingEntry};
use super::traits::{MeshError, MeshResult, MeshStats, Radio};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A frame waiting for transmission
#[derive(Debug, Clone)]
struct Outgoing {
    frame: LinkFrame,
    /// Network frame carried by a CONTENT frame, kept decoded for resubmission
    carried: Option<NetworkFrame>,
}

/// Link-layer send queue, sequence counter and pending acknowledgements
#[derive(Debug, Clone)]
pub struct LinkLayer {
    local: NicAddr,
    next_seq: SeqNo,
    send_queue: VecDeque<Outgoing>,
    max_queue_len: usize,
    pending: PendingAcks<NetworkFrame>,
}

impl LinkLayer {
    /// Create a link layer for `local`
    pub fn new(local: NicAddr, config: &NodeConfig) -> Self {
        Self {
            local,
            next_seq: 0,
            send_queue: VecDeque::new(),
            max_queue_len: config.max_queue_len,
            pending: PendingAcks::new(config.link_ack_timeout()),
        }
    }

    fn enqueue(
        &mut self,
        destination: NicAddr,
        frame_type: LinkFrameType,
        body: String,
        carried: Option<NetworkFrame>,
    ) -> MeshResult<SeqNo> {
        if self.send_queue.len() >= self.max_queue_len {
            return Err(MeshError::QueueFull);
        }

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let frame = LinkFrame::new(self.local, seq, destination, frame_type, body);
        self.send_queue.push_back(Outgoing { frame, carried });
        Ok(seq)
    }

    /// Queue a control frame (anything but CONTENT)
    pub fn send(
        &mut self,
        destination: NicAddr,
        frame_type: LinkFrameType,
        body: impl Into<String>,
    ) -> MeshResult<SeqNo> {
        self.enqueue(destination, frame_type, body.into(), None)
    }

    /// Queue a CONTENT frame carrying `carried` to `next_hop`
    pub fn send_content(&mut self, next_hop: NicAddr, carried: NetworkFrame) -> MeshResult<SeqNo> {
        let body = carried.to_wire();
        self.enqueue(next_hop, LinkFrameType::Content, body, Some(carried))
    }

    /// Transmit every queued frame, in order.
    ///
    /// Unicast CONTENT frames are registered for acknowledgement before they
    /// go out. A frame that does not encode within the size limit is dropped;
    /// a radio refusal is treated like a lost frame and left to the timeout.
    pub fn dispatch(
        &mut self,
        now: Duration,
        radio: &mut dyn Radio,
        max_frame_size: usize,
        stats: &mut MeshStats,
    ) {
        let limit = max_frame_size.min(radio.max_frame_size());
        while let Some(Outgoing { frame, carried }) = self.send_queue.pop_front() {
            let bytes = match frame.encode(limit) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("{}: dropping {} seq {}: {}", self.local, frame.frame_type, frame.seq, e);
                    stats.send_failures += 1;
                    continue;
                }
            };

            if frame.wants_ack() {
                if let Some(carried) = carried {
                    self.pending.register(frame.seq, carried, frame.destination, now);
                }
            }

            match radio.broadcast(&bytes) {
                Ok(()) => {
                    stats.frames_tx += 1;
                    stats.bytes_tx += bytes.len() as u64;
                    debug!("{}: tx {}", self.local, frame.to_wire());
                }
                Err(e) => {
                    warn!(
                        "{}: radio refused {} seq {}: {}",
                        self.local, frame.frame_type, frame.seq, e
                    );
                    stats.send_failures += 1;
                }
            }
        }
    }

    /// Handle a link ACK from `from`. Returns true if it cleared an entry.
    pub fn on_ack(&mut self, from: NicAddr, seq: SeqNo) -> bool {
        self.pending
            .acknowledge_if(seq, |entry| entry.next_hop == from)
            .is_some()
    }

    /// Remove every unacknowledged frame whose deadline has passed
    pub fn expire(&mut self, now: Duration) -> Vec<(SeqNo, PendingEntry<NetworkFrame>)> {
        self.pending.expire(now)
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Duration> {
        self.pending.next_deadline()
    }

    /// Frames waiting to be transmitted
    pub fn queue_len(&self) -> usize {
        self.send_queue.len()
    }

    /// Frames transmitted and awaiting acknowledgement
    pub fn pending(&self) -> &PendingAcks<NetworkFrame> {
        &self.pending
    }
}

impl MeshNode {
    /// Queue a link control frame, counting it if the queue is full
    pub(super) fn send_link(
        &mut self,
        destination: NicAddr,
        frame_type: LinkFrameType,
        body: impl Into<String>,
    ) -> bool {
        match self.link.send(destination, frame_type, body) {
            Ok(_) => true,
            Err(e) => {
                debug!("{}: {} to {} not queued: {}", self.addr, frame_type, destination, e);
                self.stats.queue_drops += 1;
                false
            }
        }
    }

    pub(super) fn drop_malformed(&mut self, err: &FrameError) {
        debug!("{}: dropping malformed frame: {}", self.addr, err);
        self.stats.malformed += 1;
    }

    /// Handle a decoded link frame
    pub(super) fn on_link_frame(&mut self, frame: LinkFrame, now: Duration) {
        let sender = frame.source;

        // Anything heard is a neighbour and its own next hop
        if self.neighbors.heard(sender, now) {
            info!("{}: new neighbour {}", self.addr, sender);
        }
        self.routes.learn_self_route(sender);

        if !frame.is_for(self.addr) {
            return;
        }

        match frame.frame_type {
            LinkFrameType::Ack => match parse_acked_seq(&frame.body) {
                Ok(seq) => {
                    if self.link.on_ack(sender, seq) {
                        self.stats.acks_received += 1;
                    } else {
                        debug!("{}: ignoring stale link ACK {} from {}", self.addr, seq, sender);
                    }
                }
                Err(e) => self.drop_malformed(&e),
            },
            LinkFrameType::FullReversal => match frame.body.parse::<NicAddr>() {
                Ok(destination) => {
                    self.on_full_reversal(sender, destination, now);
                }
                Err(e) => self.drop_malformed(&FrameError::from(e)),
            },
            LinkFrameType::SoundOff => {
                self.send_link(NicAddr::BROADCAST, LinkFrameType::OneTwo, "");
            }
            LinkFrameType::OneTwo | LinkFrameType::Present | LinkFrameType::Pulse => {}
            LinkFrameType::Content => {
                if frame.destination == self.addr
                    && self.send_link(sender, LinkFrameType::Ack, frame.seq.to_string())
                {
                    self.stats.acks_sent += 1;
                }
                match NetworkFrame::decode_str(&frame.body) {
                    Ok(carried) => self.on_network_frame(carried, now),
                    Err(e) => self.drop_malformed(&e),
                }
            }
        }
    }

    /// Evict neighbours that failed to acknowledge and re-route what they were carrying
    pub(super) fn expire_link(&mut self, now: Duration) {
        for (seq, entry) in self.link.expire(now) {
            self.stats.link_timeouts += 1;
            let lost = entry.next_hop;
            self.neighbors.remove(&lost);
            let affected = self.routes.purge_next_hop(&lost);
            info!(
                "{}: no link ACK for seq {} from {}, evicted ({} routes dropped)",
                self.addr, seq, lost, affected
            );
            self.queue_network(entry.item, now);
        }
    }
}
