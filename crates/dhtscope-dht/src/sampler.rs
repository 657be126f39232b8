//! Discovery sampler
//!
//! Samples the network by looking up random targets and keeps track of
//! which node identifiers this process has already seen.

use crate::{random_node_id, Result, SamplerConfig};
use dhtscope_core::{Contact, DhtEngine, NodeId};
use futures::future::join_all;
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

/// Identifiers seen during this process run
enum DiscoveredSet {
    Unbounded(HashSet<String>),
    Bounded(LruCache<String, ()>),
}

impl DiscoveredSet {
    fn new(capacity: Option<NonZeroUsize>) -> Self {
        match capacity {
            Some(cap) => Self::Bounded(LruCache::new(cap)),
            None => Self::Unbounded(HashSet::new()),
        }
    }

    /// Insert `key`, returning true if it was not already present
    fn insert(&mut self, key: String) -> bool {
        match self {
            Self::Unbounded(set) => set.insert(key),
            Self::Bounded(cache) => {
                if cache.get(&key).is_some() {
                    return false;
                }
                cache.put(key, ());
                true
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Unbounded(set) => set.len(),
            Self::Bounded(cache) => cache.len(),
        }
    }
}

/// Issues batches of random lookups and returns first-time contacts
pub struct DiscoverySampler<E> {
    engine: Arc<E>,
    config: SamplerConfig,
    discovered: Mutex<DiscoveredSet>,
}

impl<E: DhtEngine> DiscoverySampler<E> {
    pub fn new(engine: Arc<E>, config: SamplerConfig) -> Self {
        let discovered = Mutex::new(DiscoveredSet::new(config.discovered_capacity));
        Self {
            engine,
            config,
            discovered,
        }
    }

    /// Run one sampling round
    ///
    /// Returns only contacts whose identifier was never returned before by
    /// this sampler. Lookup failures contribute nothing; this never fails.
    pub async fn discover(&self) -> Vec<Contact> {
        tracing::info!("Starting DHT node discovery");

        let (first, second) = match (self.random_targets(), self.random_targets()) {
            (Ok(first), Ok(second)) => (first, second),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Error during node discovery: {}", e);
                return Vec::new();
            }
        };

        let (first, second) = futures::join!(
            join_all(first.into_iter().map(|target| self.bounded_lookup(target))),
            join_all(second.into_iter().map(|target| self.bounded_lookup(target))),
        );

        let new_contacts = self.retain_new(first.into_iter().chain(second).flatten());

        let queries = self.config.batch_size * 2;
        if !new_contacts.is_empty() {
            tracing::info!(
                "Discovery results: {} new nodes, {} unique total, {:.2} nodes/query",
                new_contacts.len(),
                self.discovered_count(),
                new_contacts.len() as f64 / queries.max(1) as f64
            );
        }

        new_contacts
    }

    /// Number of identifiers currently remembered
    pub fn discovered_count(&self) -> usize {
        self.discovered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn random_targets(&self) -> Result<Vec<NodeId>> {
        (0..self.config.batch_size).map(|_| random_node_id()).collect()
    }

    /// Look up `target`, yielding nothing on error or timeout
    async fn bounded_lookup(&self, target: NodeId) -> Vec<Contact> {
        match tokio::time::timeout(self.config.lookup_timeout, self.engine.lookup(target)).await {
            Ok(Ok(contacts)) => contacts,
            Ok(Err(e)) => {
                tracing::debug!("Lookup error for {}: {}", target, e);
                Vec::new()
            }
            Err(_) => {
                tracing::debug!("Lookup for {} timed out", target);
                Vec::new()
            }
        }
    }

    fn retain_new(&self, contacts: impl Iterator<Item = Contact>) -> Vec<Contact> {
        let mut discovered = self
            .discovered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        contacts
            .filter(|contact| discovered.insert(contact.id.to_hex()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhtscope_core::engine::mock::MockEngine;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::time::{Duration, Instant};

    fn contact(byte: u8) -> Contact {
        Contact::new(
            NodeId([byte; 20]),
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, byte), 6881),
        )
    }

    fn config(batch_size: usize) -> SamplerConfig {
        SamplerConfig {
            batch_size,
            lookup_timeout: Duration::from_millis(200),
            discovered_capacity: None,
        }
    }

    #[tokio::test]
    async fn test_discover_dedups_across_calls() {
        let engine = Arc::new(MockEngine::with_contacts(vec![contact(1)]));
        let sampler = DiscoverySampler::new(engine.clone(), config(4));

        let first = sampler.discover().await;
        assert_eq!(first, vec![contact(1)]);
        assert_eq!(engine.lookups_issued(), 8);

        let second = sampler.discover().await;
        assert!(second.is_empty());
        assert_eq!(sampler.discovered_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_lookups_yield_nothing() {
        let engine = Arc::new(MockEngine::with_contacts(vec![contact(1)]));
        engine.set_fail_lookups(true);
        let sampler = DiscoverySampler::new(engine, config(4));

        assert!(sampler.discover().await.is_empty());
        assert_eq!(sampler.discovered_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_lookups_are_bounded_by_timeout() {
        let engine = Arc::new(MockEngine::with_contacts(vec![contact(1)]));
        engine.set_lookup_delay(Some(Duration::from_secs(30)));
        let sampler = DiscoverySampler::new(engine.clone(), config(16));

        let started = Instant::now();
        let found = sampler.discover().await;

        assert!(found.is_empty());
        assert_eq!(engine.lookups_issued(), 32);
        // Lookups run concurrently, so the whole round costs about one timeout
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_bounded_set_forgets_oldest() {
        let engine = Arc::new(MockEngine::with_contacts(vec![contact(1), contact(2)]));
        let sampler = DiscoverySampler::new(
            engine.clone(),
            SamplerConfig {
                discovered_capacity: NonZeroUsize::new(2),
                ..config(1)
            },
        );

        assert_eq!(sampler.discover().await, vec![contact(1), contact(2)]);
        assert_eq!(sampler.discovered_count(), 2);

        // A third identifier pushes out the least recently seen one
        engine.set_contacts(vec![contact(3)]);
        assert_eq!(sampler.discover().await, vec![contact(3)]);
        assert_eq!(sampler.discovered_count(), 2);

        engine.set_contacts(vec![contact(1)]);
        assert_eq!(sampler.discover().await, vec![contact(1)]);
    }
}
