//! Live multi-node mode
//!
//! Every node runs in its own tokio task and owns its `MeshNode`. A
//! `broadcast` channel plays the radio medium: each transmission goes to
//! every task, which keeps it only if the sender is within `range` positions
//! of itself on a line. A node wakes up when a frame arrives, when the
//! application hands it a message, or when its next timer is due.

use anyhow::{Context, Result};
use lrmesh_core::mesh::{
    AppEvent, MeshError, MeshNode, MeshResult, MeshStats, NicAddr, NodeConfig, Radio,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Idle wait when a node has no timer armed
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Live run parameters
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Number of node tasks
    pub nodes: usize,
    /// How many line positions a transmission reaches
    pub range: usize,
    /// Wall-clock run time
    pub duration: Duration,
    /// Messages sent from the first node to the last
    pub messages: usize,
    /// Gap between messages
    pub message_interval: Duration,
    /// Protocol configuration for every node
    pub node: NodeConfig,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            nodes: 4,
            range: 1,
            duration: Duration::from_secs(5),
            messages: 3,
            message_interval: Duration::from_millis(500),
            node: NodeConfig::default(),
        }
    }
}

/// One frame on the shared medium
#[derive(Debug, Clone)]
struct Transmission {
    from: usize,
    bytes: Arc<Vec<u8>>,
}

/// Radio that puts frames on the broadcast channel
struct ChannelRadio {
    idx: usize,
    max_frame_size: usize,
    medium: broadcast::Sender<Transmission>,
}

impl Radio for ChannelRadio {
    fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn broadcast(&mut self, frame: &[u8]) -> MeshResult<()> {
        self.medium
            .send(Transmission {
                from: self.idx,
                bytes: Arc::new(frame.to_vec()),
            })
            .map(|_| ())
            .map_err(|_| MeshError::Radio("medium closed".into()))
    }
}

/// Something that happened during a live run
#[derive(Debug, Clone)]
pub struct LiveEvent {
    pub node_idx: usize,
    pub at: Duration,
    pub event: AppEvent,
}

/// Outcome of a live run
#[derive(Debug, Default)]
pub struct LiveReport {
    pub events: Vec<LiveEvent>,
    pub stats: Vec<MeshStats>,
}

impl LiveReport {
    /// Payloads delivered to `node_idx`, in arrival order
    pub fn delivered_to(&self, node_idx: usize) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.node_idx == node_idx)
            .filter_map(|e| match &e.event {
                AppEvent::Delivered { payload, .. } => Some(payload.as_str()),
                _ => None,
            })
            .collect()
    }
}

struct NodeTask {
    idx: usize,
    range: usize,
    node: MeshNode,
    radio: ChannelRadio,
    medium: broadcast::Receiver<Transmission>,
    outbox: mpsc::Receiver<(NicAddr, String)>,
    events: mpsc::UnboundedSender<LiveEvent>,
    shutdown: broadcast::Receiver<()>,
    start: Instant,
}

/// Whether the node at `idx` picks up a transmission from `from`
fn in_range(idx: usize, from: usize, range: usize) -> bool {
    from != idx && from.abs_diff(idx) <= range
}

impl NodeTask {
    async fn run(mut self) -> MeshStats {
        loop {
            let wait = self
                .node
                .next_wakeup()
                .map(|at| at.saturating_sub(self.start.elapsed()))
                .unwrap_or(IDLE_POLL);

            tokio::select! {
                _ = self.shutdown.recv() => break,
                received = self.medium.recv() => match received {
                    Ok(t) => {
                        if in_range(self.idx, t.from, self.range) {
                            self.node.on_receive(&t.bytes, self.start.elapsed());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("node {} missed {} frames", self.idx, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some((dest, payload)) = self.outbox.recv() => {
                    if let Err(e) = self.node.originate(dest, &payload, self.start.elapsed()) {
                        warn!("node {} refused message: {}", self.idx, e);
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let now = self.start.elapsed();
            self.node.tick(now, &mut self.radio);
            for event in self.node.take_events() {
                let _ = self.events.send(LiveEvent {
                    node_idx: self.idx,
                    at: now,
                    event,
                });
            }
        }

        debug!("node {} stopped", self.idx);
        self.node.stats()
    }
}

/// Run `config.nodes` tasks until the duration elapses or `stop` is set
pub async fn run(config: LiveConfig, stop: Arc<AtomicBool>) -> Result<LiveReport> {
    anyhow::ensure!(config.nodes >= 2, "live mode needs at least two nodes");
    config.node.validate().context("invalid node configuration")?;

    let (medium_tx, _) = broadcast::channel(1024);
    let (shutdown_tx, _) = broadcast::channel(1);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let start = Instant::now();

    let mut outboxes = Vec::with_capacity(config.nodes);
    let mut addrs = Vec::with_capacity(config.nodes);
    let mut handles = Vec::with_capacity(config.nodes);

    for idx in 0..config.nodes {
        let addr = NicAddr::from_index(idx as u32 + 1);
        let node = MeshNode::new(addr, config.node.clone())?;
        let (out_tx, out_rx) = mpsc::channel(64);

        let task = NodeTask {
            idx,
            range: config.range,
            node,
            radio: ChannelRadio {
                idx,
                max_frame_size: config.node.max_frame_size,
                medium: medium_tx.clone(),
            },
            medium: medium_tx.subscribe(),
            outbox: out_rx,
            events: event_tx.clone(),
            shutdown: shutdown_tx.subscribe(),
            start,
        };
        handles.push(tokio::spawn(task.run()));
        outboxes.push(out_tx);
        addrs.push(addr);
    }
    drop(event_tx);
    info!("started {} node tasks", config.nodes);

    let last = config.nodes - 1;
    let deadline = start + config.duration;
    let mut next_message = start + config.message_interval;
    let mut sent = 0;

    while Instant::now() < deadline && !stop.load(Ordering::SeqCst) {
        if sent < config.messages && Instant::now() >= next_message {
            let payload = format!("live message {}", sent);
            outboxes[0]
                .send((addrs[last], payload))
                .await
                .context("node task exited early")?;
            sent += 1;
            next_message += config.message_interval;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let _ = shutdown_tx.send(());
    let mut report = LiveReport::default();
    for handle in handles {
        report.stats.push(handle.await.context("node task panicked")?);
    }
    while let Some(event) = event_rx.recv().await {
        report.events.push(event);
    }
    report.events.sort_by_key(|e| e.at);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_live_line_delivers() {
        // Generous timers so a loaded test machine does not evict neighbours
        let node = NodeConfig::default()
            .with_link_ack_timeout(Duration::from_millis(200))
            .with_network_ack_timeout(Duration::from_secs(5))
            .with_route_retry_interval(Duration::from_millis(50))
            .with_reversal_holdoff(Duration::from_millis(50));
        let config = LiveConfig {
            nodes: 3,
            duration: Duration::from_secs(3),
            messages: 1,
            message_interval: Duration::from_millis(100),
            node,
            ..Default::default()
        };

        let report = run(config, Arc::new(AtomicBool::new(false))).await.unwrap();
        assert_eq!(report.stats.len(), 3);
        assert_eq!(report.delivered_to(2), vec!["live message 0"]);
        assert!(report.delivered_to(1).is_empty());
    }

    #[test]
    fn test_range_on_a_line() {
        assert!(in_range(1, 0, 1));
        assert!(in_range(1, 2, 1));
        assert!(!in_range(1, 1, 1));
        assert!(!in_range(0, 2, 1));
        assert!(in_range(0, 2, 2));
    }

    #[tokio::test]
    async fn test_live_needs_two_nodes() {
        let config = LiveConfig {
            nodes: 1,
            ..Default::default()
        };
        assert!(run(config, Arc::new(AtomicBool::new(false))).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_flag_ends_run() {
        let config = LiveConfig {
            duration: Duration::from_secs(60),
            ..Default::default()
        };
        let report = run(config, Arc::new(AtomicBool::new(true))).await.unwrap();
        assert_eq!(report.stats.len(), 4);
    }
}
