//! Periodic aggregation
//!
//! Two independent tasks run for the lifetime of the process: the snapshot
//! tick refreshes live metrics, the discovery tick samples the network and
//! persists newly found nodes. Tick bodies log their own failures so one
//! bad tick never stops the next.

use crate::context::AppContext;
use dhtscope_core::{unix_now, DhtEngine, StatsSnapshot, TOP_K};
use dhtscope_dht::count_contacts;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Compute a fresh snapshot from the engine and the popularity counter
pub fn take_snapshot<E: DhtEngine>(ctx: &AppContext<E>) -> StatsSnapshot {
    let routing_table = ctx.engine.routing_table();
    StatsSnapshot {
        current_node_count: count_contacts(routing_table.as_deref()),
        uptime: ctx.uptime(),
        top_ranked_items: ctx.popularity.top(TOP_K),
        taken_at: unix_now(),
    }
}

/// Recompute and publish the snapshot
pub fn refresh_snapshot<E: DhtEngine>(ctx: &AppContext<E>) {
    let snapshot = take_snapshot(ctx);
    tracing::trace!(
        "Snapshot: {} nodes in routing table, {} ranked items",
        snapshot.current_node_count,
        snapshot.top_ranked_items.len()
    );
    ctx.publish(snapshot);
}

/// Sample the network once and store every new contact
///
/// Returns the number of contacts stored.
pub async fn discovery_round<E: DhtEngine>(ctx: &AppContext<E>) -> usize {
    let contacts = ctx.sampler.discover().await;
    let found = contacts.len();

    let stored = contacts
        .into_iter()
        .filter(|contact| ctx.observe(contact.clone()))
        .count();

    if stored < found {
        tracing::warn!("Stored {} of {} discovered nodes", stored, found);
    }
    stored
}

/// Refresh the snapshot every `period`
pub async fn run_snapshot_loop<E: DhtEngine>(ctx: Arc<AppContext<E>>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        refresh_snapshot(&ctx);
    }
}

/// Run a discovery round every `period`, starting one period from now
pub async fn run_discovery_loop<E: DhtEngine>(ctx: Arc<AppContext<E>>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let stored = discovery_round(&ctx).await;
        tracing::debug!("Discovery tick stored {} nodes", stored);
    }
}

/// Handles of the running periodic tasks
pub struct Aggregator {
    snapshot: JoinHandle<()>,
    discovery: JoinHandle<()>,
}

impl Aggregator {
    /// Spawn both periodic tasks with the intervals from the context's config
    pub fn spawn<E: DhtEngine>(ctx: Arc<AppContext<E>>) -> Self {
        let snapshot_period = ctx.config.snapshot_interval();
        let discovery_period = ctx.config.discovery_interval();
        tracing::info!(
            "Starting aggregator (snapshot every {:?}, discovery every {:?})",
            snapshot_period,
            discovery_period
        );

        Self {
            snapshot: tokio::spawn(run_snapshot_loop(ctx.clone(), snapshot_period)),
            discovery: tokio::spawn(run_discovery_loop(ctx, discovery_period)),
        }
    }

    /// Stop both timers; an in-flight discovery round is abandoned
    pub async fn shutdown(self) {
        self.snapshot.abort();
        self.discovery.abort();
        let _ = self.snapshot.await;
        let _ = self.discovery.await;
        tracing::info!("Aggregator stopped");
    }
}
