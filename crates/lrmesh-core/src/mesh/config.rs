//! Per-node protocol tunables
//!
//! Durations are stored as integer microseconds so a config file stays
//! readable (`"link_ack_timeout_us": 10000`); the engine reads them back
//! through the `Duration` accessors.

use super::traits::{MeshError, MeshResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one mesh node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Link-layer acknowledgement timeout
    pub link_ack_timeout_us: u64,
    /// End-to-end acknowledgement timeout
    pub network_ack_timeout_us: u64,
    /// Delay before retrying a message that found no route
    pub route_retry_interval_us: u64,
    /// Hop limit stamped on locally originated network frames
    pub default_hop_limit: u8,
    /// Largest frame the node will hand to its radio
    pub max_frame_size: usize,
    /// Capacity of each send queue
    pub max_queue_len: usize,
    /// No-route attempts before a message is abandoned (`None` = never)
    pub route_retry_limit: Option<u32>,
    /// Minimum spacing between propagated FULL_REVERSALs for one destination
    pub reversal_holdoff_us: u64,
    /// How long a delivered (source, seq) pair is remembered
    pub duplicate_cache_ttl_us: u64,
    /// Entries kept in the duplicate cache
    pub duplicate_cache_size: usize,
    /// PULSE beacon period (`None` = no beacons)
    pub heartbeat_interval_us: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            link_ack_timeout_us: 10_000,       // 10 ms
            network_ack_timeout_us: 1_000_000, // 1 s
            route_retry_interval_us: 10_000,
            default_hop_limit: 16,
            max_frame_size: 1500,
            max_queue_len: 64,
            route_retry_limit: Some(200),
            reversal_holdoff_us: 10_000,
            duplicate_cache_ttl_us: 2_000_000,
            duplicate_cache_size: 256,
            heartbeat_interval_us: None,
        }
    }
}

impl NodeConfig {
    pub fn with_link_ack_timeout(mut self, timeout: Duration) -> Self {
        self.link_ack_timeout_us = timeout.as_micros() as u64;
        self
    }

    pub fn with_network_ack_timeout(mut self, timeout: Duration) -> Self {
        self.network_ack_timeout_us = timeout.as_micros() as u64;
        self
    }

    pub fn with_route_retry_interval(mut self, interval: Duration) -> Self {
        self.route_retry_interval_us = interval.as_micros() as u64;
        self
    }

    pub fn with_hop_limit(mut self, hops: u8) -> Self {
        self.default_hop_limit = hops;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_max_queue_len(mut self, len: usize) -> Self {
        self.max_queue_len = len;
        self
    }

    pub fn with_route_retry_limit(mut self, limit: Option<u32>) -> Self {
        self.route_retry_limit = limit;
        self
    }

    pub fn with_reversal_holdoff(mut self, holdoff: Duration) -> Self {
        self.reversal_holdoff_us = holdoff.as_micros() as u64;
        self
    }

    pub fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval_us = interval.map(|d| d.as_micros() as u64);
        self
    }

    pub fn link_ack_timeout(&self) -> Duration {
        Duration::from_micros(self.link_ack_timeout_us)
    }

    pub fn network_ack_timeout(&self) -> Duration {
        Duration::from_micros(self.network_ack_timeout_us)
    }

    pub fn route_retry_interval(&self) -> Duration {
        Duration::from_micros(self.route_retry_interval_us)
    }

    pub fn reversal_holdoff(&self) -> Duration {
        Duration::from_micros(self.reversal_holdoff_us)
    }

    pub fn duplicate_cache_ttl(&self) -> Duration {
        Duration::from_micros(self.duplicate_cache_ttl_us)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_us.map(Duration::from_micros)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> MeshResult<()> {
        if self.link_ack_timeout_us == 0 {
            return Err(MeshError::Config("link_ack_timeout_us must be non-zero".into()));
        }
        if self.network_ack_timeout_us < self.link_ack_timeout_us {
            return Err(MeshError::Config(format!(
                "network_ack_timeout_us ({}) is shorter than link_ack_timeout_us ({})",
                self.network_ack_timeout_us, self.link_ack_timeout_us
            )));
        }
        if self.route_retry_interval_us == 0 {
            return Err(MeshError::Config("route_retry_interval_us must be non-zero".into()));
        }
        if self.max_queue_len == 0 {
            return Err(MeshError::Config("max_queue_len must be non-zero".into()));
        }
        if self.duplicate_cache_size == 0 {
            return Err(MeshError::Config("duplicate_cache_size must be non-zero".into()));
        }
        if self.heartbeat_interval_us == Some(0) {
            return Err(MeshError::Config("heartbeat_interval_us must be non-zero".into()));
        }
        Ok(())
    }
}
