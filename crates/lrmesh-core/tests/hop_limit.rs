//! Hop-limit exhaustion turns a CONTENT frame into a NACK for its source.

use lrmesh_core::mesh::simulation::{MeshSimulator, SimConfig};
use lrmesh_core::mesh::{
    AppEvent, CaptureRadio, LinkFrame, LinkFrameType, MeshNode, NetworkFrame, NetworkFrameType,
    NicAddr, NodeConfig,
};
use std::time::Duration;

fn n(i: u32) -> NicAddr {
    NicAddr::from_index(i)
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Deliver a link CONTENT frame from `from` to `to` carrying `carried`
fn carry(to: &mut MeshNode, from: NicAddr, carried: &NetworkFrame, now: Duration) {
    let frame = LinkFrame::new(from, 7, to.addr(), LinkFrameType::Content, carried.to_wire());
    to.on_receive(&frame.to_bytes(), now);
}

fn transmitted(node: &mut MeshNode, now: Duration) -> Vec<LinkFrame> {
    let mut radio = CaptureRadio::new(1500);
    node.tick(now, &mut radio);
    radio
        .take()
        .iter()
        .map(|bytes| LinkFrame::decode(bytes).expect("node sent a malformed frame"))
        .collect()
}

#[test]
fn test_last_hop_sends_nack_not_content() {
    let mut relay = MeshNode::new(n(2), NodeConfig::default()).unwrap();
    let content = NetworkFrame::new(n(1), 5, n(3), NetworkFrameType::Content, 1, "too far");
    carry(&mut relay, n(1), &content, ms(0));

    let sent = transmitted(&mut relay, ms(0));
    let stats = relay.stats();
    assert_eq!(stats.forwarded, 0);
    assert_eq!(stats.hop_limit_exceeded, 1);
    assert_eq!(stats.nacks_sent, 1);

    // A link ACK for the carrier, then the NACK riding in a CONTENT frame
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].frame_type, LinkFrameType::Ack);
    assert_eq!(sent[0].body, "7");

    assert_eq!(sent[1].frame_type, LinkFrameType::Content);
    assert_eq!(sent[1].destination, n(1));
    let nack = NetworkFrame::decode_str(&sent[1].body).unwrap();
    assert_eq!(nack.frame_type, NetworkFrameType::Nack);
    assert_eq!(nack.source, n(2));
    assert_eq!(nack.destination, n(1));
    assert_eq!(nack.body, "5");
}

#[test]
fn test_zero_hop_frame_not_forwarded() {
    let mut relay = MeshNode::new(n(2), NodeConfig::default()).unwrap();
    let content = NetworkFrame::new(n(1), 9, n(3), NetworkFrameType::Content, 0, "already spent");
    carry(&mut relay, n(1), &content, ms(0));

    assert_eq!(relay.stats().forwarded, 0);
    assert_eq!(relay.stats().nacks_sent, 1);
}

#[test]
fn test_exhausted_ack_is_dropped_quietly() {
    let mut relay = MeshNode::new(n(2), NodeConfig::default()).unwrap();
    let ack = NetworkFrame::new(n(3), 0, n(1), NetworkFrameType::Ack, 1, "5");
    carry(&mut relay, n(1), &ack, ms(0));

    let sent = transmitted(&mut relay, ms(0));
    assert_eq!(relay.stats().hop_limit_exceeded, 1);
    assert_eq!(relay.stats().nacks_sent, 0);
    // Only the link ACK goes out
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].frame_type, LinkFrameType::Ack);
}

#[test]
fn test_frame_with_hops_left_is_forwarded() {
    let mut relay = MeshNode::new(n(2), NodeConfig::default()).unwrap();
    // Teach the relay that node 3 is a neighbour
    let pulse = LinkFrame::new(n(3), 0, NicAddr::BROADCAST, LinkFrameType::Pulse, "");
    relay.on_receive(&pulse.to_bytes(), ms(0));

    let content = NetworkFrame::new(n(1), 5, n(3), NetworkFrameType::Content, 2, "onward");
    carry(&mut relay, n(1), &content, ms(0));

    let sent = transmitted(&mut relay, ms(0));
    assert_eq!(relay.stats().forwarded, 1);
    let onward = sent
        .iter()
        .find(|f| f.frame_type == LinkFrameType::Content)
        .expect("frame was not forwarded");
    assert_eq!(onward.destination, n(3));
    let inner = NetworkFrame::decode_str(&onward.body).unwrap();
    assert_eq!(inner.hop_limit, 1);
    assert_eq!(inner.seq, 5);
    assert_eq!(inner.source, n(1));
}

#[test]
fn test_source_learns_of_exhaustion() {
    let node = NodeConfig::default().with_hop_limit(1);
    let config = SimConfig::default().with_node_count(3).with_node_config(node);
    let mut sim = MeshSimulator::new(config).expect("failed to create simulator");
    let dest = sim.addr(2).unwrap();

    let seq = sim.send_message(0, "one hop short", Some(2)).expect("message refused");
    sim.run(500);

    assert!(sim.app_events(0).contains(&AppEvent::Nacked { destination: dest, seq }));
    assert!(sim.delivered_payloads(2).is_empty());
    assert_eq!(sim.node_stats(1).unwrap().forwarded, 0);
    assert!(sim.node_stats(1).unwrap().hop_limit_exceeded >= 1);

    let sender = sim.node(0).unwrap();
    assert!(sender.network_layer().pending().is_empty());
    assert_eq!(sim.stats().nacks, 1);
}
