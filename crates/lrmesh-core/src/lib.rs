//! # Link-Reversal Mesh Core
//!
//! This crate implements a small mesh networking stack for radios that share
//! a lossy broadcast medium. Nodes discover each other by listening, route by
//! keeping a set of candidate next hops per destination, and repair routes by
//! link reversal: a node that loses every way towards a destination adopts
//! its neighbours as candidates and tells them to drop it.
//!
//! ## Overview
//!
//! - **Link layer**: one-hop CONTENT frames are acknowledged per frame; a
//!   silent neighbour is evicted and its traffic re-routed
//! - **Network layer**: end-to-end ACK, hop limits with NACK back to the
//!   source, duplicate suppression
//! - **Discovery**: SOUND_OFF / ONE_TWO neighbour polling and FULL_REVERSAL
//!   flooding
//! - **Simulation**: a deterministic multi-node harness with range, loss and
//!   node failure
//!
//! The engine is single-threaded and event driven. The host feeds received
//! bytes to [`mesh::MeshNode::on_receive`] and calls [`mesh::MeshNode::tick`]
//! with the current time; frames come out through a [`mesh::Radio`].
//!
//! ## Wire Format
//!
//! ```text
//! link:    source/seq/destination/TYPE/body
//! network: source/seq/destination/TYPE/hop_limit/body
//! ```
//!
//! A network frame travels as the body of a link CONTENT frame.
//!
//! ## Example
//!
//! ```rust
//! use lrmesh_core::prelude::*;
//!
//! let config = SimConfig::default().with_node_count(3);
//! let mut sim = MeshSimulator::new(config).unwrap();
//!
//! sim.send_message(0, "across two hops", Some(2));
//! sim.run(500);
//!
//! assert_eq!(sim.delivered_payloads(2), vec!["across two hops"]);
//! ```

pub mod mesh;

// Re-export main types
pub use mesh::{
    AppEvent, LinkFrame, MeshError, MeshNetwork, MeshNode, MeshResult, NetworkFrame, NicAddr,
    NodeConfig, Radio,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::mesh::{
        AppEvent, CaptureRadio, MeshError, MeshNetwork, MeshNode, MeshResult, MeshStats, NicAddr,
        NodeConfig, Radio,
    };
    // Simulation
    pub use crate::mesh::{MeshSimulator, SimConfig};
}
