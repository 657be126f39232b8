//! DHT engine backed by the `mainline` crate
//!
//! Mainline runs its own actor thread and derives its own BEP 42 node id.
//! This wrapper drives it through the async API, turns returned nodes into
//! contacts and mirrors the routing table for the node count gauge.

use crate::{DhtError, EngineConfig, Result};
use dhtscope_core::{BucketNode, Contact, DhtEngine, EngineEvent, Error, NodeId};
use mainline::async_dht::AsyncDht;
use mainline::{Dht, Id, Node};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type RoutingMirror = Arc<RwLock<Option<Arc<BucketNode>>>>;

/// A live Mainline DHT node
pub struct MainlineEngine {
    dht: AsyncDht,
    routing_refresh: Duration,
    routing_table: RoutingMirror,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl MainlineEngine {
    /// Bind the UDP socket and start the mainline actor
    ///
    /// Bootstrapping happens in the background; [`DhtEngine::join`]
    /// waits for it.
    pub fn start(config: &EngineConfig) -> Result<Self> {
        let mut builder = Dht::builder();
        if !config.bootstrap_nodes.is_empty() {
            builder = builder.bootstrap(&config.bootstrap_nodes);
        }
        if let Some(port) = config.port {
            builder = builder.port(port);
        }
        let dht = builder.build().map_err(DhtError::Io)?.as_async();

        Ok(Self {
            dht,
            routing_refresh: config.routing_refresh,
            routing_table: Arc::new(RwLock::new(None)),
            refresher: Mutex::new(None),
        })
    }

    fn stop_refresher(&self) {
        let refresher = self
            .refresher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(refresher) = refresher {
            refresher.abort();
        }
    }
}

impl DhtEngine for MainlineEngine {
    async fn join(&self, id: NodeId) -> dhtscope_core::Result<()> {
        tracing::debug!(
            "Mainline derives its own node id, requested identity {} is not applied",
            id
        );

        let bootstrapped = self
            .dht
            .bootstrapped()
            .await
            .map_err(|_| Error::EngineShutdown)?;
        if !bootstrapped {
            return Err(Error::Join("bootstrap found no nodes".to_string()));
        }

        let info = self.dht.info().await.map_err(|_| Error::EngineShutdown)?;
        tracing::info!(
            "Mainline node listening on {} (public address {:?})",
            info.local_addr(),
            info.public_address()
        );

        let refresher = tokio::spawn(refresh_routing_table(
            self.dht.clone(),
            self.routing_table.clone(),
            self.routing_refresh,
        ));
        if let Some(previous) = self
            .refresher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(refresher)
        {
            previous.abort();
        }

        Ok(())
    }

    async fn lookup(&self, target: NodeId) -> dhtscope_core::Result<Vec<Contact>> {
        let target =
            Id::from_bytes(target.as_bytes()).map_err(|e| Error::Lookup(e.to_string()))?;
        let nodes = self
            .dht
            .find_node(target)
            .await
            .map_err(|_| Error::EngineShutdown)?;

        Ok(nodes.iter().filter_map(to_contact).collect())
    }

    fn routing_table(&self) -> Option<Arc<BucketNode>> {
        self.routing_table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mainline exposes no hook for routing table changes or incoming
    /// queries, so there is no live stream.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        None
    }

    async fn shutdown(&self) {
        self.stop_refresher();
        let mut dht = self.dht.clone();
        dht.shutdown().await;
        tracing::info!("Mainline node stopped");
    }
}

impl Drop for MainlineEngine {
    fn drop(&mut self) {
        self.stop_refresher();
    }
}

/// Convert a mainline node, skipping anything that is not IPv4
fn to_contact(node: &Node) -> Option<Contact> {
    let id = NodeId::from_bytes(&node.id().to_vec()).ok()?;
    match *node.address() {
        SocketAddr::V4(addr) => Some(Contact::new(id, addr)),
        SocketAddr::V6(_) => None,
    }
}

/// Parse `host:port` entries of the routing table dump into one bucket
fn mirror_bucket(entries: &[String]) -> BucketNode {
    BucketNode::leaf(
        entries
            .iter()
            .filter_map(|entry| entry.parse::<SocketAddrV4>().ok())
            .collect(),
    )
}

/// Copy the engine's routing table into `mirror` every `period`
async fn refresh_routing_table(dht: AsyncDht, mirror: RoutingMirror, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        match dht.to_bootstrap().await {
            Ok(entries) => {
                let bucket = mirror_bucket(&entries);
                *mirror.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(bucket));
            }
            Err(_) => {
                tracing::debug!("Mainline node shut down, routing table mirror stopped");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::count_contacts;
    use mainline::Testnet;

    #[test]
    fn test_mirror_bucket_skips_unparsable_entries() {
        let entries = vec![
            "1.2.3.4:6881".to_string(),
            "router.example.org:6881".to_string(),
            "[::1]:6881".to_string(),
            "5.6.7.8:51413".to_string(),
        ];
        let bucket = mirror_bucket(&entries);
        assert_eq!(count_contacts(Some(&bucket)), 2);
        assert_eq!(bucket.contacts[1], "5.6.7.8:51413".parse().unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_join_and_lookup_on_local_testnet() {
        let testnet = Testnet::new(10).unwrap();
        let engine = MainlineEngine::start(&EngineConfig {
            port: None,
            bootstrap_nodes: testnet.bootstrap.clone(),
            routing_refresh: Duration::from_millis(50),
        })
        .unwrap();

        engine.join(NodeId([7u8; 20])).await.unwrap();

        let found = engine.lookup(NodeId([0x42; 20])).await.unwrap();
        assert!(!found.is_empty());
        assert!(found.iter().all(|contact| contact.port() != 0));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(count_contacts(engine.routing_table().as_deref()) > 0);
        assert!(engine.take_events().is_none());

        engine.shutdown().await;
        assert!(matches!(
            engine.lookup(NodeId([0x42; 20])).await,
            Err(Error::EngineShutdown)
        ));
    }
}
