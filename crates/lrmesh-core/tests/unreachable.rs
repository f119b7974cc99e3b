//! Traffic for destinations nobody can reach must stay bounded and end in a
//! terminal notification.

use lrmesh_core::mesh::{AppEvent, CaptureRadio, MeshError, MeshNode, NicAddr, NodeConfig};
use std::time::Duration;

fn n(i: u32) -> NicAddr {
    NicAddr::from_index(i)
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Two nodes that always hear each other, ticked once per millisecond
struct Pair {
    nodes: [MeshNode; 2],
    events: [Vec<AppEvent>; 2],
}

impl Pair {
    fn new() -> Self {
        Self {
            nodes: [
                MeshNode::new(n(1), NodeConfig::default()).unwrap(),
                MeshNode::new(n(2), NodeConfig::default()).unwrap(),
            ],
            events: [Vec::new(), Vec::new()],
        }
    }

    fn run(&mut self, from_ms: u64, to_ms: u64) {
        for t in from_ms..to_ms {
            let now = ms(t);
            for i in 0..2 {
                let mut radio = CaptureRadio::new(1500);
                self.nodes[i].tick(now, &mut radio);
                for bytes in radio.take() {
                    self.nodes[1 - i].on_receive(&bytes, now);
                }
            }
            for i in 0..2 {
                self.events[i].extend(self.nodes[i].take_events());
            }
        }
    }
}

fn is_terminal_for(event: &AppEvent, wanted: u32) -> bool {
    match event {
        AppEvent::Nacked { seq, .. }
        | AppEvent::TimedOut { seq, .. }
        | AppEvent::Unroutable { seq, .. } => *seq == wanted,
        AppEvent::Delivered { .. } => false,
    }
}

#[test]
fn test_isolated_node_gives_up() {
    let mut node = MeshNode::new(n(1), NodeConfig::default()).unwrap();
    let ghost = n(99);
    let seq = node.originate(ghost, "anyone?", ms(0)).unwrap();

    let mut radio = CaptureRadio::new(1500);
    let mut events = Vec::new();
    for t in 0..3000 {
        node.tick(ms(t), &mut radio);
        radio.take();
        events.extend(node.take_events());
    }

    assert_eq!(events, vec![AppEvent::Unroutable { destination: ghost, seq }]);
    let stats = node.stats();
    assert_eq!(stats.unroutable, 1);
    // One poll per failed attempt, none after giving up
    assert_eq!(stats.sound_offs_sent, 199);
    assert_eq!(node.network_layer().queue_len(), 0);
    assert_eq!(node.link_layer().queue_len(), 0);
    assert!(node.next_wakeup().is_none());
}

#[test]
fn test_queue_stays_bounded() {
    let config = NodeConfig::default().with_max_queue_len(8);
    let mut node = MeshNode::new(n(1), config).unwrap();

    for i in 0..8 {
        node.originate(n(99), &format!("m{}", i), ms(0)).unwrap();
    }
    assert_eq!(node.originate(n(99), "one too many", ms(0)), Err(MeshError::QueueFull));
    assert_eq!(node.network_layer().queue_len(), 8);

    let mut radio = CaptureRadio::new(1500);
    for t in 0..100 {
        node.tick(ms(t), &mut radio);
        radio.take();
        assert!(node.network_layer().queue_len() <= 8);
    }
}

#[test]
fn test_unknown_destination_between_neighbours_terminates() {
    let mut pair = Pair::new();
    let ghost = n(99);

    let seqs: Vec<u32> = (0..5)
        .map(|i| pair.nodes[0].originate(ghost, &format!("lost {}", i), ms(0)).unwrap())
        .collect();
    pair.run(0, 5000);

    for seq in seqs {
        assert!(
            pair.events[0].iter().any(|e| is_terminal_for(e, seq)),
            "seq {} never reached a terminal state",
            seq
        );
    }
    assert!(pair.events[1].is_empty(), "relay raised application events");

    for node in &pair.nodes {
        assert_eq!(node.network_layer().queue_len(), 0);
        assert!(node.network_layer().pending().is_empty());
        assert!(node.link_layer().pending().is_empty());
        assert_eq!(node.stats().delivered, 0);
    }
}
