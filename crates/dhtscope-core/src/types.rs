//! Core data types for dhtscope

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;

/// Size of a node identifier in bytes
pub const ID_SIZE: usize = 20;

/// A 20-byte DHT node identifier (also used for lookup targets and info hashes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; ID_SIZE]);

impl NodeId {
    /// Create a NodeId from a byte slice, which must be exactly 20 bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }
        let mut id = [0u8; ID_SIZE];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    /// Lowercase hex form, the key used for deduplication and persistence
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;
        Self::from_bytes(&bytes)
    }
}

impl From<[u8; ID_SIZE]> for NodeId {
    fn from(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }
}

/// A DHT participant as returned by a lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: NodeId,
    pub addr: SocketAddrV4,
}

impl Contact {
    pub fn new(id: NodeId, addr: SocketAddrV4) -> Self {
        Self { id, addr }
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Node data as reported by the engine's live event stream, before validation
#[derive(Debug, Clone, Default)]
pub struct RawNode {
    /// Raw identifier bytes (empty when the engine had none)
    pub id: Vec<u8>,
    pub host: String,
    pub port: i64,
}

/// Geolocation for an IP address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub city: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A single observation of a node, the input to a store upsert
#[derive(Debug, Clone)]
pub struct NodeObservation {
    pub contact: Contact,
    pub geo: Option<GeoLocation>,
}

impl NodeObservation {
    pub fn new(contact: Contact, geo: Option<GeoLocation>) -> Self {
        Self { contact, geo }
    }
}

/// Durable row kept for every node identifier ever observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Hex-encoded node identifier
    pub node_id: String,
    pub ip: String,
    pub port: u16,
    pub city: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub times_seen: u64,
    /// Unix timestamp of the first observation
    pub first_seen: u64,
    /// Unix timestamp of the most recent observation
    pub last_seen: u64,
}

/// Point-in-time view of live metrics, replaced wholesale on every tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    /// Contacts currently held in the engine's routing table
    pub current_node_count: usize,
    pub uptime: Duration,
    /// At most ten (info hash, count) pairs, count descending
    pub top_ranked_items: Vec<(String, u64)>,
    /// Unix timestamp when the snapshot was taken
    pub taken_at: u64,
}

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Format an uptime as `1d 2h 3m 4s`, omitting leading zero units
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, hours, minutes, seconds) = (
        secs / 86_400,
        (secs % 86_400) / 3_600,
        (secs % 3_600) / 60,
        secs % 60,
    );

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
