//! IP geolocation
//!
//! Resolution is best effort: an unknown address simply has no location.

use dhtscope_core::GeoLocation;
use serde::Deserialize;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Maps an IPv4 address to a location
pub trait GeoResolver: Send + Sync {
    fn resolve(&self, ip: Ipv4Addr) -> Option<GeoLocation>;
}

/// Resolver used when no geolocation data is configured
pub struct NoGeo;

impl GeoResolver for NoGeo {
    fn resolve(&self, _ip: Ipv4Addr) -> Option<GeoLocation> {
        None
    }
}

#[derive(Error, Debug)]
pub enum GeoTableError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),
}

/// Entry of the JSON table file
#[derive(Debug, Deserialize)]
struct TableEntry {
    network: String,
    #[serde(flatten)]
    location: GeoLocation,
}

/// Longest-prefix lookup over a table of IPv4 networks
pub struct PrefixTable {
    /// (network address, prefix length, location)
    networks: Vec<(u32, u8, GeoLocation)>,
}

impl PrefixTable {
    /// Build a table from `(cidr, location)` pairs
    pub fn new<'a>(
        entries: impl IntoIterator<Item = (&'a str, GeoLocation)>,
    ) -> Result<Self, GeoTableError> {
        let networks = entries
            .into_iter()
            .map(|(cidr, location)| {
                let (network, len) = parse_cidr(cidr)?;
                Ok((network, len, location))
            })
            .collect::<Result<Vec<_>, GeoTableError>>()?;
        Ok(Self { networks })
    }

    /// Load a table from a JSON array of
    /// `{"network": "a.b.c.d/len", "city": .., "country": .., ...}` objects
    pub fn load(path: &std::path::Path) -> Result<Self, GeoTableError> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<TableEntry> = serde_json::from_str(&content)?;
        Self::new(
            entries
                .iter()
                .map(|entry| (entry.network.as_str(), entry.location.clone())),
        )
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

impl GeoResolver for PrefixTable {
    fn resolve(&self, ip: Ipv4Addr) -> Option<GeoLocation> {
        let addr = u32::from(ip);
        self.networks
            .iter()
            .filter(|(network, len, _)| addr & mask(*len) == *network)
            .max_by_key(|(_, len, _)| *len)
            .map(|(_, _, location)| location.clone())
    }
}

fn mask(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(len))
    }
}

fn parse_cidr(cidr: &str) -> Result<(u32, u8), GeoTableError> {
    let invalid = || GeoTableError::InvalidNetwork(cidr.to_string());

    let (addr, len) = match cidr.split_once('/') {
        Some((addr, len)) => (addr, len.parse::<u8>().map_err(|_| invalid())?),
        None => (cidr, 32),
    };
    if len > 32 {
        return Err(invalid());
    }
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;

    Ok((u32::from(addr) & mask(len), len))
}
