//! Route loss and repair: relay failure, revival and reversal handling.

use lrmesh_core::mesh::simulation::{MeshSimulator, SimConfig};
use lrmesh_core::mesh::{
    AppEvent, CaptureRadio, LinkFrame, LinkFrameType, MeshNode, NicAddr, NodeConfig,
};
use std::time::Duration;

fn line(count: usize) -> MeshSimulator {
    MeshSimulator::new(SimConfig::default().with_node_count(count))
        .expect("failed to create simulator")
}

fn n(i: u32) -> NicAddr {
    NicAddr::from_index(i)
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Feed one raw link frame into `node`
fn hear(
    node: &mut MeshNode,
    source: NicAddr,
    frame_type: LinkFrameType,
    body: &str,
    now: Duration,
) {
    let frame = LinkFrame::new(source, 0, NicAddr::BROADCAST, frame_type, body);
    node.on_receive(&frame.to_bytes(), now);
}

/// Tick `node` and decode what it transmitted
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
fn test_relay_failure_clears_route() {
    let mut sim = line(3);
    let (a1, a2) = (sim.addr(1).unwrap(), sim.addr(2).unwrap());

    sim.send_message(0, "before", Some(2)).expect("message refused");
    sim.run(200);
    assert_eq!(sim.delivered_payloads(2), vec!["before"]);
    assert!(sim.node(0).unwrap().routing_table().is_candidate(&a2, &a1));

    assert!(sim.kill(1));
    let seq = sim.send_message(0, "after", Some(2)).expect("message refused");
    sim.run(2500);

    let sender = sim.node(0).unwrap();
    assert!(!sender.neighbor_table().contains(&a1), "dead relay still a neighbour");
    assert!(!sender.routing_table().is_candidate(&a2, &a1), "dead relay still a next hop");
    assert!(sim.node_stats(0).unwrap().link_timeouts >= 1);

    // The application hears about it; nothing is left queued
    let events = sim.app_events(0);
    assert!(events.contains(&AppEvent::TimedOut { destination: a2, seq }));
    assert!(events.contains(&AppEvent::Unroutable { destination: a2, seq }));
    assert_eq!(sender.network_layer().queue_len(), 0);
    assert!(sender.network_layer().pending().is_empty());
    assert_eq!(sim.delivered_payloads(2), vec!["before"]);
}

#[test]
fn test_revived_relay_carries_traffic_again() {
    let mut sim = line(3);
    sim.send_message(0, "first", Some(2)).expect("message refused");
    sim.run(200);

    sim.kill(1);
    sim.send_message(0, "lost", Some(2)).expect("message refused");
    sim.run(2500);

    assert!(sim.revive(1));
    assert_eq!(sim.neighbor_count(1), 0, "reboot kept the neighbour table");

    sim.send_message(0, "second", Some(2)).expect("message refused");
    sim.run(500);

    assert_eq!(sim.delivered_payloads(2), vec!["first", "second"]);
}

#[test]
fn test_reversal_not_propagated_by_sink() {
    let mut node = MeshNode::new(n(1), NodeConfig::default()).unwrap();
    hear(&mut node, n(2), LinkFrameType::Pulse, "", ms(0));
    hear(&mut node, n(3), LinkFrameType::Pulse, "", ms(0));
    assert!(transmitted(&mut node, ms(0)).is_empty());

    // Node 3 is its own next hop, so node 1 keeps a route after dropping node 2
    hear(&mut node, n(2), LinkFrameType::FullReversal, &n(3).to_string(), ms(1));
    assert!(node.routing_table().is_candidate(&n(3), &n(3)));
    assert!(transmitted(&mut node, ms(1)).is_empty());
    assert_eq!(node.stats().reversals_sent, 0);
}

#[test]
fn test_reversal_propagated_when_routes_run_out() {
    let mut node = MeshNode::new(n(1), NodeConfig::default()).unwrap();
    hear(&mut node, n(2), LinkFrameType::Pulse, "", ms(0));
    hear(&mut node, n(3), LinkFrameType::Pulse, "", ms(0));

    // Losing its only candidate makes node 1 reverse towards everyone
    hear(&mut node, n(3), LinkFrameType::FullReversal, &n(3).to_string(), ms(1));
    let sent = transmitted(&mut node, ms(1));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].frame_type, LinkFrameType::FullReversal);
    assert!(sent[0].destination.is_broadcast());
    assert_eq!(sent[0].body, n(3).to_string());
    assert_eq!(
        node.routing_table().candidates(&n(3)).collect::<Vec<_>>(),
        vec![n(2), n(3)]
    );

    // Same story right away: table updated, announcement held off
    hear(&mut node, n(3), LinkFrameType::FullReversal, &n(3).to_string(), ms(2));
    hear(&mut node, n(2), LinkFrameType::FullReversal, &n(3).to_string(), ms(2));
    assert!(transmitted(&mut node, ms(2)).is_empty());
    assert!(node.routing_table().has_route(&n(3)));
}

#[test]
fn test_named_destination_answers_present() {
    let mut node = MeshNode::new(n(1), NodeConfig::default()).unwrap();
    hear(&mut node, n(2), LinkFrameType::FullReversal, &n(1).to_string(), ms(0));

    let sent = transmitted(&mut node, ms(0));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].frame_type, LinkFrameType::Present);
    assert!(sent[0].destination.is_broadcast());
}

#[test]
fn test_sound_off_answered_with_one_two() {
    let mut node = MeshNode::new(n(1), NodeConfig::default()).unwrap();
    hear(&mut node, n(2), LinkFrameType::SoundOff, "", ms(0));

    let sent = transmitted(&mut node, ms(0));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].frame_type, LinkFrameType::OneTwo);
    assert!(node.neighbor_table().contains(&n(2)));
}
