//! Shared application state
//!
//! Every periodic task, the live event handler and the API handlers hold
//! an `Arc<AppContext>`.

use crate::config::Config;
use crate::geo::GeoResolver;
use crate::store::NodeStore;
use arc_swap::ArcSwap;
use dhtscope_core::{unix_now, Contact, DhtEngine, NodeObservation, StatsSnapshot};
use dhtscope_dht::{DiscoverySampler, PopularityCounter};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct AppContext<E> {
    pub engine: Arc<E>,
    pub store: NodeStore,
    pub sampler: DiscoverySampler<E>,
    pub popularity: PopularityCounter,
    pub geo: Box<dyn GeoResolver>,
    pub config: Config,
    snapshot: ArcSwap<StatsSnapshot>,
    started: Instant,
}

impl<E: DhtEngine> AppContext<E> {
    pub fn new(
        engine: Arc<E>,
        store: NodeStore,
        geo: Box<dyn GeoResolver>,
        config: Config,
    ) -> Self {
        let sampler = DiscoverySampler::new(engine.clone(), config.sampler_config());
        Self {
            engine,
            store,
            sampler,
            popularity: PopularityCounter::new(),
            geo,
            config,
            snapshot: ArcSwap::from_pointee(StatsSnapshot {
                taken_at: unix_now(),
                ..Default::default()
            }),
            started: Instant::now(),
        }
    }

    /// Time since the context was created
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// The latest published snapshot
    pub fn snapshot(&self) -> Arc<StatsSnapshot> {
        self.snapshot.load_full()
    }

    /// Replace the published snapshot in one step
    pub fn publish(&self, snapshot: StatsSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    /// Geolocate and persist one sighting of `contact`
    ///
    /// Returns false if the store rejected it; the failure is logged.
    pub fn observe(&self, contact: Contact) -> bool {
        let geo = self.geo.resolve(contact.ip());
        self.store.record(&NodeObservation::new(contact, geo))
    }
}
