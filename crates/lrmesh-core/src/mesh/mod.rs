//! Link-Reversal Mesh
//!
//! A two-layer protocol stack for a shared broadcast medium where every
//! transmission is heard by every node in range. The stack separates:
//!
//! - **Frame**: text codecs for link and network frames
//! - **Link**: one-hop delivery with per-frame acknowledgement
//! - **Network**: end-to-end delivery with hop limits, ACK and NACK
//! - **Discovery**: SOUND_OFF polling and FULL_REVERSAL route repair
//! - **Neighbor / Routing / Pending**: the tables the layers share
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────────┐
//! │                                Application                                 │
//! │   originate(dest, payload)                 take_events()                   │
//! └────────────────────────────────────────────────────────────────────────────┘
//!                                        │
//!                                        ▼
//! ┌────────────────────────────────────────────────────────────────────────────┐
//! │                               Network Layer                                │
//! │  ┌───────────────┐  ┌──────────────┐  ┌───────────────┐  ┌──────────────┐  │
//! │  │   send queue  │  │    relay     │  │    ACK/NACK   │  │    dedup     │  │
//! │  └───────────────┘  └──────────────┘  └───────────────┘  └──────────────┘  │
//! └────────────────────────────────────────────────────────────────────────────┘
//!                                        │
//!                                        ▼
//! ┌────────────────────────────────────────────────────────────────────────────┐
//! │  RoutingTable (dest -> candidate next hops)   NeighborTable   Discovery    │
//! └────────────────────────────────────────────────────────────────────────────┘
//!                                        │
//!                                        ▼
//! ┌────────────────────────────────────────────────────────────────────────────┐
//! │                                 Link Layer                                 │
//! │  ┌──────────────────────────────┐  ┌────────────────────────────────────┐  │
//! │  │       send queue + seq       │  │  pending ACKs (evict on timeout)   │  │
//! │  └──────────────────────────────┘  └────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────────────────────┘
//!                                        │
//!                                        ▼
//! ┌────────────────────────────────────────────────────────────────────────────┐
//! │                       Radio Trait (broadcast bytes)                        │
//! └────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use lrmesh_core::mesh::{CaptureRadio, MeshNode, NicAddr, NodeConfig};
//! use std::time::Duration;
//!
//! let mut node = MeshNode::new(NicAddr::from_index(1), NodeConfig::default()).unwrap();
//! let mut radio = CaptureRadio::new(1500);
//!
//! node.originate(NicAddr::from_index(2), "hello", Duration::ZERO).unwrap();
//! node.tick(Duration::ZERO, &mut radio);
//!
//! // No neighbours yet, so the node polls for them
//! assert_eq!(radio.take().len(), 1);
//! ```

pub mod address;
pub mod config;
pub mod discovery;
pub mod frame;
pub mod link;
pub mod neighbor;
pub mod network;
pub mod node;
pub mod pending;
pub mod routing;
pub mod simulation;
pub mod traits;

// Re-export main types
pub use address::{AddressParseError, NicAddr};
pub use config::NodeConfig;
pub use discovery::{DiscoveryAction, ReversalOutcome};
pub use frame::{FrameError, LinkFrame, LinkFrameType, NetworkFrame, NetworkFrameType, SeqNo};
pub use link::LinkLayer;
pub use neighbor::{Neighbor, NeighborTable};
pub use network::NetworkLayer;
pub use node::MeshNode;
pub use pending::{PendingAcks, PendingEntry};
pub use routing::{DuplicateCache, Route, RoutingTable};
pub use simulation::{MeshSimulator, NodePosition, Placement, SimConfig, SimEvent, SimStats};
pub use traits::{AppEvent, CaptureRadio, MeshError, MeshNetwork, MeshResult, MeshStats, Radio};
