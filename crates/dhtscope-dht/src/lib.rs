//! dhtscope DHT - crawler-side view of a Mainline-style DHT
//!
//! This crate derives the crawler's node identity, samples the network
//! through randomized lookups and computes the gauges read from the
//! engine's routing table. [`MainlineEngine`] connects it to the live
//! BitTorrent DHT.

pub mod engine;
pub mod identity;
pub mod popularity;
pub mod routing;
pub mod sampler;

use dhtscope_core::{NodeId, ID_SIZE};
use std::num::NonZeroUsize;
use std::time::Duration;
use thiserror::Error;

pub use engine::MainlineEngine;
pub use identity::{derive_node_id, derive_node_id_for};
pub use popularity::PopularityCounter;
pub use routing::count_contacts;
pub use sampler::DiscoverySampler;

#[derive(Error, Debug)]
pub enum DhtError {
    #[error("Failed to generate random bytes: {0}")]
    Random(String),

    #[error("Failed to start DHT node: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DhtError>;

/// Discovery sampler configuration
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Random targets per batch; two batches run per discovery
    pub batch_size: usize,
    /// Upper bound for a single lookup
    pub lookup_timeout: Duration,
    /// Bound on remembered identifiers (None keeps every identifier)
    pub discovered_capacity: Option<NonZeroUsize>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            lookup_timeout: Duration::from_secs(5),
            discovered_capacity: None,
        }
    }
}

/// Settings for [`MainlineEngine`]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// UDP port to bind; None picks any free port
    pub port: Option<u16>,
    /// Bootstrap nodes (host:port); empty uses the mainline defaults
    pub bootstrap_nodes: Vec<String>,
    /// How often the routing table mirror is refreshed
    pub routing_refresh: Duration,
}

/// Generate a cryptographically random node ID, used as a lookup target
pub fn random_node_id() -> Result<NodeId> {
    let mut id = [0u8; ID_SIZE];
    getrandom::getrandom(&mut id).map_err(|e| DhtError::Random(e.to_string()))?;
    Ok(NodeId(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_node_ids_differ() {
        let a = random_node_id().unwrap();
        let b = random_node_id().unwrap();
        assert_ne!(a, b);
    }
}
