//! Live engine events
//!
//! Nodes the engine adds to its routing table are validated, geolocated
//! and stored as they arrive. Info hash events feed the popularity counter.

use crate::context::AppContext;
use dhtscope_core::{Contact, DhtEngine, EngineEvent, NodeId, NodeObservation, RawNode};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, PartialEq)]
pub enum InvalidNode {
    #[error("missing node id")]
    MissingId,

    #[error("node id has {0} bytes")]
    BadIdLength(usize),

    #[error("invalid port number: {0}")]
    InvalidPort(i64),

    #[error("invalid IP address: {0}")]
    InvalidHost(String),
}

/// Check a raw engine node and turn it into a contact
pub fn validate(node: &RawNode) -> Result<Contact, InvalidNode> {
    if node.id.is_empty() {
        return Err(InvalidNode::MissingId);
    }
    let id = NodeId::from_bytes(&node.id).map_err(|_| InvalidNode::BadIdLength(node.id.len()))?;

    if !(1..=65_535).contains(&node.port) {
        return Err(InvalidNode::InvalidPort(node.port));
    }

    if !is_dotted_quad(&node.host) {
        return Err(InvalidNode::InvalidHost(node.host.clone()));
    }
    // Dotted quads like 300.1.1.1 pass the shape check but are not addresses
    let ip: Ipv4Addr = node
        .host
        .parse()
        .map_err(|_| InvalidNode::InvalidHost(node.host.clone()))?;

    Ok(Contact::new(id, SocketAddrV4::new(ip, node.port as u16)))
}

/// Four dot-separated groups of one to three digits
fn is_dotted_quad(host: &str) -> bool {
    let groups: Vec<&str> = host.split('.').collect();
    groups.len() == 4
        && groups
            .iter()
            .all(|g| (1..=3).contains(&g.len()) && g.bytes().all(|b| b.is_ascii_digit()))
}

/// Apply one engine event
pub fn handle_event<E: DhtEngine>(ctx: &AppContext<E>, event: EngineEvent) {
    match event {
        EngineEvent::Node(raw) => match validate(&raw) {
            Ok(contact) => {
                let location = ctx.geo.resolve(contact.ip());
                tracing::info!(
                    "New node: id={} host={} port={} location={}",
                    contact.id,
                    contact.ip(),
                    contact.port(),
                    location
                        .as_ref()
                        .map(|geo| format!(
                            "{}, {}",
                            geo.city.as_deref().unwrap_or("?"),
                            geo.country.as_deref().unwrap_or("?")
                        ))
                        .unwrap_or_else(|| "Unknown".to_string())
                );
                ctx.store.record(&NodeObservation::new(contact, location));
            }
            Err(e) => {
                tracing::debug!("Dropping invalid node data: {}", e);
            }
        },
        EngineEvent::InfoHash(info_hash) => {
            ctx.popularity.record(&info_hash.to_hex());
        }
    }
}

/// Consume engine events until the stream closes
pub async fn run_live_events<E: DhtEngine>(
    ctx: Arc<AppContext<E>>,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
) {
    tracing::info!("Listening for live engine events");
    while let Some(event) = events.recv().await {
        handle_event(&ctx, event);
    }
    tracing::info!("Engine event stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::geo::NoGeo;
    use crate::store::NodeStore;
    use dhtscope_core::engine::mock::MockEngine;

    fn raw(id: Vec<u8>, host: &str, port: i64) -> RawNode {
        RawNode {
            id,
            host: host.to_string(),
            port,
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_node() {
        let contact = validate(&raw(vec![1u8; 20], "93.184.216.34", 6881)).unwrap();
        assert_eq!(contact.id, NodeId([1u8; 20]));
        assert_eq!(contact.ip(), Ipv4Addr::new(93, 184, 216, 34));
        assert_eq!(contact.port(), 6881);
    }

    #[test]
    fn test_validate_rejects_malformed_nodes() {
        assert_eq!(
            validate(&raw(vec![], "1.2.3.4", 80)),
            Err(InvalidNode::MissingId)
        );
        assert_eq!(
            validate(&raw(vec![1u8; 8], "1.2.3.4", 80)),
            Err(InvalidNode::BadIdLength(8))
        );
        assert_eq!(
            validate(&raw(vec![1u8; 20], "1.2.3.4", 0)),
            Err(InvalidNode::InvalidPort(0))
        );
        assert_eq!(
            validate(&raw(vec![1u8; 20], "1.2.3.4", 70_000)),
            Err(InvalidNode::InvalidPort(70_000))
        );
        for host in ["example.com", "1.2.3", "1.2.3.4.5", "1234.1.1.1", "300.1.1.1", ""] {
            assert!(matches!(
                validate(&raw(vec![1u8; 20], host, 80)),
                Err(InvalidNode::InvalidHost(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_live_events_feed_store_and_popularity() {
        let engine = Arc::new(MockEngine::new());
        let events = engine.take_events().unwrap();
        let ctx = Arc::new(AppContext::new(
            engine.clone(),
            NodeStore::open_in_memory().unwrap(),
            Box::new(NoGeo),
            Config::default(),
        ));

        engine.emit(EngineEvent::Node(raw(vec![2u8; 20], "8.8.4.4", 6881)));
        engine.emit(EngineEvent::Node(raw(vec![2u8; 20], "8.8.4.4", 6881)));
        engine.emit(EngineEvent::Node(raw(vec![3u8; 20], "bad-host", 6881)));
        engine.emit(EngineEvent::InfoHash(NodeId([9u8; 20])));
        engine.emit(EngineEvent::InfoHash(NodeId([9u8; 20])));

        let task = tokio::spawn(run_live_events(ctx.clone(), events));

        // Events are handled in order, so the last one landing means all did
        let info_hash = NodeId([9u8; 20]).to_hex();
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while ctx.popularity.top(1) != vec![(info_hash.clone(), 2)] {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        task.abort();

        assert_eq!(ctx.store.count().unwrap(), 1);
        let record = ctx.store.get(&NodeId([2u8; 20]).to_hex()).unwrap().unwrap();
        assert_eq!(record.times_seen, 2);
        assert_eq!(ctx.popularity.len(), 1);
    }
}
