//! End-to-end delivery through the simulator.
//!
//! Nodes sit on a line 100 m apart; with the default 150 m range each one
//! only hears its direct neighbours.

use lrmesh_core::mesh::simulation::{MeshSimulator, SimConfig};
use lrmesh_core::mesh::AppEvent;

fn line(count: usize) -> MeshSimulator {
    MeshSimulator::new(SimConfig::default().with_node_count(count))
        .expect("failed to create simulator")
}

fn count_delivered(events: &[AppEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, AppEvent::Delivered { .. }))
        .count()
}

#[test]
fn test_direct_delivery_exactly_once() {
    let mut sim = line(2);
    let seq = sim.send_message(0, "hello", Some(1)).expect("message refused");

    sim.run(100);

    assert_eq!(sim.delivered_payloads(1), vec!["hello"]);
    assert_eq!(sim.stats().messages_delivered, 1);

    // Both acknowledgements arrived: nothing is left pending anywhere
    for idx in 0..2 {
        let node = sim.node(idx).unwrap();
        assert!(node.link_layer().pending().is_empty(), "node {} has link frames pending", idx);
        assert!(node.network_layer().pending().is_empty(), "node {} has messages pending", idx);
        assert_eq!(node.network_layer().queue_len(), 0);
    }

    // The sender heard nothing bad about its message
    assert!(sim.app_events(0).iter().all(|e| !matches!(
        e,
        AppEvent::TimedOut { seq: s, .. } | AppEvent::Nacked { seq: s, .. } if *s == seq
    )));
}

#[test]
fn test_multi_hop_delivery() {
    let mut sim = line(4);

    // Cold-start reversals can leave short loops that the hop limit breaks
    // with a NACK; an application that retries gets through once the
    // tables settle.
    let mut delivered = false;
    for _ in 0..10 {
        sim.send_message(0, "end to end", Some(3)).expect("message refused");
        if sim.run_until(300, |s| !s.delivered_payloads(3).is_empty()) {
            delivered = true;
            break;
        }
    }
    assert!(delivered, "message never crossed the line");

    // Let the acknowledgement travel back
    sim.run(500);

    assert_eq!(sim.delivered_payloads(3), vec!["end to end"]);
    let sender = sim.node(0).unwrap();
    assert!(sender.network_layer().pending().is_empty());
    assert!(sim.node_stats(1).unwrap().forwarded > 0);
    assert!(sim.node_stats(2).unwrap().forwarded > 0);
}

#[test]
fn test_intermediate_nodes_do_not_deliver() {
    let mut sim = line(3);
    sim.send_message(0, "for the far end", Some(2)).expect("message refused");
    sim.run(500);

    assert_eq!(sim.delivered_payloads(2), vec!["for the far end"]);
    assert!(sim.delivered_payloads(1).is_empty());
    assert!(sim.delivered_payloads(0).is_empty());
}

#[test]
fn test_broadcast_delivered_once_without_acks() {
    let config = SimConfig::default().with_node_count(4).with_radio_range(250.0);
    let mut sim = MeshSimulator::new(config).expect("failed to create simulator");

    // Node 1 reaches every other node directly
    sim.send_message(1, "to everyone", None).expect("message refused");
    sim.run(100);

    for idx in [0, 2, 3] {
        assert_eq!(sim.delivered_payloads(idx), vec!["to everyone"], "node {}", idx);
    }
    assert!(sim.delivered_payloads(1).is_empty());

    let totals = sim.aggregate_stats();
    assert_eq!(totals.acks_sent, 0);
    assert_eq!(totals.nacks_sent, 0);
    assert_eq!(totals.forwarded, 0);
    assert!(sim.node(1).unwrap().network_layer().pending().is_empty());
}

#[test]
fn test_several_messages_in_order() {
    let mut sim = line(2);
    for text in ["one", "two", "three"] {
        sim.send_message(0, text, Some(1)).expect("message refused");
    }
    sim.run(200);

    assert_eq!(sim.delivered_payloads(1), vec!["one", "two", "three"]);
    assert_eq!(count_delivered(sim.app_events(1)), 3);
    assert_eq!(sim.stats().delivery_rate(), 1.0);
}

#[test]
fn test_replies_reuse_learned_routes() {
    let mut sim = line(3);
    sim.send_message(0, "ping", Some(2)).expect("message refused");
    sim.run(500);
    let reversals = sim.aggregate_stats().reversals_sent;

    sim.send_message(2, "pong", Some(0)).expect("message refused");
    sim.run(500);

    assert_eq!(sim.delivered_payloads(0), vec!["pong"]);
    // The acknowledgement for "ping" already taught node 2 the way back
    assert_eq!(sim.aggregate_stats().reversals_sent, reversals);
}

#[test]
fn test_rebooted_sender_restarts_sequence_numbers() {
    let mut sim = line(2);
    let first = sim.send_message(0, "before reboot", Some(1)).expect("message refused");
    sim.run(100);
    assert_eq!(sim.delivered_payloads(1), vec!["before reboot"]);

    assert!(sim.kill(0));
    assert!(sim.revive(0));

    // Well inside the receiver's duplicate window
    let second = sim.send_message(0, "after reboot", Some(1)).expect("message refused");
    assert_eq!(second, first);
    sim.run(1000);

    assert_eq!(sim.delivered_payloads(1), vec!["before reboot", "after reboot"]);
    assert!(sim.app_events(0).iter().all(|e| matches!(e, AppEvent::Delivered { .. })));
    assert!(sim.node(0).unwrap().network_layer().pending().is_empty());
}
