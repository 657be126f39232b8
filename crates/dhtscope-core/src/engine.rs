//! Interface to the DHT protocol engine
//!
//! The crawler never speaks the DHT wire protocol itself. It drives an
//! engine through this trait: join the network, issue `find_node` style
//! lookups, read the routing table and consume live events. A mock engine
//! is provided for tests and offline runs.

use crate::{Contact, NodeId, RawNode, Result};
use std::future::Future;
use std::net::SocketAddrV4;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One node of the engine's bucket tree
///
/// Buckets split into `left`/`right` children as the routing table grows,
/// so the tree can be arbitrarily unbalanced. Any part may be missing.
/// Only contact addresses are kept; the tree is read as a size gauge.
#[derive(Debug, Clone, Default)]
pub struct BucketNode {
    pub contacts: Vec<SocketAddrV4>,
    pub left: Option<Arc<BucketNode>>,
    pub right: Option<Arc<BucketNode>>,
}

impl BucketNode {
    /// A leaf bucket holding the given contact addresses
    pub fn leaf(contacts: Vec<SocketAddrV4>) -> Self {
        Self {
            contacts,
            left: None,
            right: None,
        }
    }

    /// An inner node with the given children
    pub fn split(left: Option<BucketNode>, right: Option<BucketNode>) -> Self {
        Self {
            contacts: Vec::new(),
            left: left.map(Arc::new),
            right: right.map(Arc::new),
        }
    }
}

/// Events emitted by the engine while it runs
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A node was added to the routing table
    Node(RawNode),
    /// An info hash was queried or announced by a remote peer
    InfoHash(NodeId),
}

/// DHT engine abstraction
///
/// This trait abstracts over the protocol engine, allowing for:
/// - A real engine in production
/// - The mock engine for tests and `--mock` runs
pub trait DhtEngine: Send + Sync + 'static {
    /// Join the network with the given identity, resolving once ready
    fn join(&self, id: NodeId) -> impl Future<Output = Result<()>> + Send;

    /// Find contacts close to `target`; callers bound this with a timeout
    fn lookup(&self, target: NodeId) -> impl Future<Output = Result<Vec<Contact>>> + Send;

    /// Root of the routing table's bucket tree, if the engine has one yet
    fn routing_table(&self) -> Option<Arc<BucketNode>>;

    /// Take the live event stream; only the first caller gets it
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>>;

    /// Stop the engine's network activity
    fn shutdown(&self) -> impl Future<Output = ()> + Send;
}

pub mod mock {
    //! Mock engine for testing and development

    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Mutex, RwLock};
    use std::time::Duration;

    /// An in-memory engine that answers every lookup with a fixed contact list
    pub struct MockEngine {
        joined: Mutex<Option<NodeId>>,
        contacts: RwLock<Vec<Contact>>,
        routing_table: RwLock<Option<Arc<BucketNode>>>,
        lookup_delay: RwLock<Option<Duration>>,
        fail_lookups: AtomicBool,
        lookups: AtomicUsize,
        events_tx: mpsc::UnboundedSender<EngineEvent>,
        events_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
        shut_down: AtomicBool,
    }

    impl MockEngine {
        /// Create a new mock engine with no contacts
        pub fn new() -> Self {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            Self {
                joined: Mutex::new(None),
                contacts: RwLock::new(Vec::new()),
                routing_table: RwLock::new(None),
                lookup_delay: RwLock::new(None),
                fail_lookups: AtomicBool::new(false),
                lookups: AtomicUsize::new(0),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                shut_down: AtomicBool::new(false),
            }
        }

        /// Create a mock engine whose lookups all return `contacts`
        pub fn with_contacts(contacts: Vec<Contact>) -> Self {
            let engine = Self::new();
            engine.set_contacts(contacts);
            engine
        }

        /// Replace the contacts returned by lookups
        pub fn set_contacts(&self, contacts: Vec<Contact>) {
            *self.contacts.write().unwrap() = contacts;
        }

        /// Replace the routing table
        pub fn set_routing_table(&self, root: Option<BucketNode>) {
            *self.routing_table.write().unwrap() = root.map(Arc::new);
        }

        /// Make every lookup sleep before answering
        pub fn set_lookup_delay(&self, delay: Option<Duration>) {
            *self.lookup_delay.write().unwrap() = delay;
        }

        /// Make every lookup fail
        pub fn set_fail_lookups(&self, fail: bool) {
            self.fail_lookups.store(fail, Ordering::SeqCst);
        }

        /// Deliver an event on the live stream
        pub fn emit(&self, event: EngineEvent) {
            // The receiver may have been dropped, which is fine for a mock
            let _ = self.events_tx.send(event);
        }

        /// Identity passed to `join`, if any
        pub fn joined_id(&self) -> Option<NodeId> {
            *self.joined.lock().unwrap()
        }

        /// Number of lookups issued so far
        pub fn lookups_issued(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }

        pub fn is_shut_down(&self) -> bool {
            self.shut_down.load(Ordering::SeqCst)
        }
    }

    impl Default for MockEngine {
        fn default() -> Self {
            Self::new()
        }
    }

    impl DhtEngine for MockEngine {
        async fn join(&self, id: NodeId) -> Result<()> {
            if self.is_shut_down() {
                return Err(Error::EngineShutdown);
            }
            *self.joined.lock().unwrap() = Some(id);
            Ok(())
        }

        async fn lookup(&self, _target: NodeId) -> Result<Vec<Contact>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);

            let delay = *self.lookup_delay.read().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if self.is_shut_down() {
                return Err(Error::EngineShutdown);
            }
            if self.fail_lookups.load(Ordering::SeqCst) {
                return Err(Error::Lookup("mock lookup failure".to_string()));
            }

            Ok(self.contacts.read().unwrap().clone())
        }

        fn routing_table(&self) -> Option<Arc<BucketNode>> {
            self.routing_table.read().unwrap().clone()
        }

        fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
            self.events_rx.lock().unwrap().take()
        }

        async fn shutdown(&self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }
    }

}
