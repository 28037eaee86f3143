//! Change-feed contract and the snapshot cache backing it.
//!
//! The engine consumes feeds, it never implements the watch machinery:
//! the host bridges its watch source (cluster watches in production,
//! direct calls in tests) into a [`MemoryFeed`] per kind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::models::{ResourceKey, Snapshot, WorkloadSnapshot};

/// Read side of a change feed: a continuously refreshed local cache.
pub trait ChangeFeed<S>: Send + Sync {
    /// True once the cache holds a complete initial listing.
    fn has_synced(&self) -> bool;

    /// Consistent copy of the cached object, `None` if it is gone.
    fn get_by_key(&self, key: &ResourceKey) -> Option<S>;
}

/// Typed change notification delivered to feed subscribers.
#[derive(Debug, Clone)]
pub enum FeedEvent<S> {
    /// Object added or updated; carries the new snapshot.
    Applied(S),
    /// Object deleted; only the key survives.
    Deleted(ResourceKey),
}

impl<S: Snapshot> FeedEvent<S> {
    pub fn key(&self) -> ResourceKey {
        match self {
            FeedEvent::Applied(snapshot) => snapshot.key(),
            FeedEvent::Deleted(key) => key.clone(),
        }
    }
}

pub type EventHandler<S> = Arc<dyn Fn(&FeedEvent<S>) + Send + Sync>;

/// Snapshot cache keyed by `namespace/name`, safe for concurrent reads
/// by all workers. The single writer is the host's watch bridge.
pub struct MemoryFeed<S> {
    objects: RwLock<HashMap<ResourceKey, S>>,
    handlers: RwLock<Vec<EventHandler<S>>>,
    synced: AtomicBool,
}

impl<S: Snapshot> MemoryFeed<S> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            objects: RwLock::new(HashMap::new()),
            handlers: RwLock::new(Vec::new()),
            synced: AtomicBool::new(false),
        })
    }

    /// Subscribes to subsequent apply/delete events.
    pub fn add_event_handler(&self, handler: EventHandler<S>) {
        self.handlers.write().unwrap().push(handler);
    }

    /// Inserts or updates an object and notifies subscribers.
    pub fn apply(&self, snapshot: S) {
        let key = snapshot.key();
        self.objects
            .write()
            .unwrap()
            .insert(key, snapshot.clone());
        self.dispatch(&FeedEvent::Applied(snapshot));
    }

    /// Removes an object and notifies subscribers with a tombstone.
    pub fn delete(&self, key: &ResourceKey) {
        self.objects.write().unwrap().remove(key);
        self.dispatch(&FeedEvent::Deleted(key.clone()));
    }

    /// Replaces the whole cache with a fresh listing, firing an apply
    /// per object. The host marks the feed synced afterwards.
    pub fn replace(&self, snapshots: Vec<S>) {
        {
            let mut objects = self.objects.write().unwrap();
            objects.clear();
            for snapshot in &snapshots {
                objects.insert(snapshot.key(), snapshot.clone());
            }
        }
        for snapshot in snapshots {
            self.dispatch(&FeedEvent::Applied(snapshot));
        }
    }

    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    fn dispatch(&self, event: &FeedEvent<S>) {
        for handler in self.handlers.read().unwrap().iter() {
            handler(event);
        }
    }
}

impl<S: Snapshot> ChangeFeed<S> for MemoryFeed<S> {
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    fn get_by_key(&self, key: &ResourceKey) -> Option<S> {
        self.objects.read().unwrap().get(key).cloned()
    }
}

/// The four workload feeds funneled into one reconciler. Lookup probes
/// DaemonSet, then Deployment, then StatefulSet, then ReplicaSet; the
/// first feed holding the key wins, so a key somehow present in two
/// feeds resolves to the higher-priority kind.
pub struct WorkloadFeeds {
    daemon_sets: Arc<dyn ChangeFeed<WorkloadSnapshot>>,
    deployments: Arc<dyn ChangeFeed<WorkloadSnapshot>>,
    stateful_sets: Arc<dyn ChangeFeed<WorkloadSnapshot>>,
    replica_sets: Arc<dyn ChangeFeed<WorkloadSnapshot>>,
}

impl WorkloadFeeds {
    pub fn new(
        daemon_sets: Arc<dyn ChangeFeed<WorkloadSnapshot>>,
        deployments: Arc<dyn ChangeFeed<WorkloadSnapshot>>,
        stateful_sets: Arc<dyn ChangeFeed<WorkloadSnapshot>>,
        replica_sets: Arc<dyn ChangeFeed<WorkloadSnapshot>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            daemon_sets,
            deployments,
            stateful_sets,
            replica_sets,
        })
    }

    fn in_priority_order(&self) -> [&dyn ChangeFeed<WorkloadSnapshot>; 4] {
        [
            self.daemon_sets.as_ref(),
            self.deployments.as_ref(),
            self.stateful_sets.as_ref(),
            self.replica_sets.as_ref(),
        ]
    }
}

impl ChangeFeed<WorkloadSnapshot> for WorkloadFeeds {
    fn has_synced(&self) -> bool {
        self.in_priority_order().iter().all(|feed| feed.has_synced())
    }

    fn get_by_key(&self, key: &ResourceKey) -> Option<WorkloadSnapshot> {
        self.in_priority_order()
            .iter()
            .find_map(|feed| feed.get_by_key(key))
    }
}
