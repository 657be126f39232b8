//! Crawler configuration

use dhtscope_dht::{EngineConfig, SamplerConfig};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory path
    pub data_dir: String,

    /// Persistence configuration
    pub store: StoreConfig,

    /// Sampling and aggregation cadence
    pub crawler: CrawlerConfig,

    /// DHT engine configuration
    pub dht: DhtConfig,

    /// HTTP API configuration
    pub api: ApiConfig,

    /// Geolocation configuration
    pub geo: GeoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file, relative paths resolve against data_dir
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Random lookup targets per batch (two batches per discovery)
    pub lookup_batch_size: usize,
    /// Timeout for a single lookup in seconds
    pub lookup_timeout_secs: u64,
    /// Snapshot tick period in seconds
    pub snapshot_interval_secs: u64,
    /// Discovery tick period in seconds
    pub discovery_interval_secs: u64,
    /// Maximum remembered identifiers, 0 keeps all of them
    pub discovered_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DhtConfig {
    /// UDP port the engine listens on, 0 picks any free port
    pub port: u16,
    /// Bootstrap nodes (host:port)
    pub bootstrap_nodes: Vec<String>,
    /// Time allowed for the engine to join the network, in seconds
    pub join_timeout_secs: u64,
    /// Routing table mirror refresh period in seconds
    pub routing_refresh_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address the HTTP API binds to
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// JSON prefix table used to geolocate node addresses
    pub table_path: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "dht_metrics.db".to_string(),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            lookup_batch_size: 32,
            lookup_timeout_secs: 5,
            snapshot_interval_secs: 2,
            discovery_interval_secs: 60,
            discovered_capacity: 0,
        }
    }
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            port: 6881,
            bootstrap_nodes: vec![
                "router.bittorrent.com:6881".to_string(),
                "dht.transmissionbt.com:6881".to_string(),
                "router.utorrent.com:6881".to_string(),
            ],
            join_timeout_secs: 60,
            routing_refresh_secs: 5,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Expand ~ in data_dir path
    pub fn data_dir(&self) -> std::path::PathBuf {
        expand_path(&self.data_dir)
    }

    /// Location of the SQLite database
    pub fn store_path(&self) -> std::path::PathBuf {
        let path = expand_path(&self.store.path);
        if path.is_absolute() {
            path
        } else {
            self.data_dir().join(path)
        }
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            batch_size: self.crawler.lookup_batch_size.max(1),
            lookup_timeout: Duration::from_secs(self.crawler.lookup_timeout_secs),
            discovered_capacity: NonZeroUsize::new(self.crawler.discovered_capacity),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            port: Some(self.dht.port).filter(|port| *port != 0),
            bootstrap_nodes: self.dht.bootstrap_nodes.clone(),
            routing_refresh: Duration::from_secs(self.dht.routing_refresh_secs.max(1)),
        }
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.dht.join_timeout_secs)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.crawler.snapshot_interval_secs.max(1))
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.crawler.discovery_interval_secs.max(1))
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &str) -> std::path::PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    std::path::PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        let sampler = config.sampler_config();
        assert_eq!(sampler.batch_size, 32);
        assert_eq!(sampler.lookup_timeout, Duration::from_secs(5));
        assert!(sampler.discovered_capacity.is_none());
        assert_eq!(config.snapshot_interval(), Duration::from_secs(2));
        assert_eq!(config.discovery_interval(), Duration::from_secs(60));
        assert_eq!(config.api.port, 3000);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/var/lib/dhtscope"

            [crawler]
            lookup_batch_size = 8
            discovered_capacity = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.crawler.lookup_batch_size, 8);
        assert_eq!(config.crawler.lookup_timeout_secs, 5);
        assert_eq!(
            config.sampler_config().discovered_capacity,
            NonZeroUsize::new(1000)
        );
        assert_eq!(
            config.store_path(),
            std::path::PathBuf::from("/var/lib/dhtscope/dht_metrics.db")
        );
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.dht.port, 6881);
        assert_eq!(parsed.store.path, "dht_metrics.db");
    }

    #[test]
    fn test_engine_config() {
        let mut config = Config::default();
        let engine = config.engine_config();
        assert_eq!(engine.port, Some(6881));
        assert_eq!(engine.bootstrap_nodes.len(), 3);
        assert_eq!(engine.routing_refresh, Duration::from_secs(5));

        config.dht.port = 0;
        config.dht.bootstrap_nodes = vec!["127.0.0.1:7000".to_string()];
        let engine = config.engine_config();
        assert_eq!(engine.port, None);
        assert_eq!(engine.bootstrap_nodes, vec!["127.0.0.1:7000".to_string()]);
    }
}
