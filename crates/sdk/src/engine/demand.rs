//! Demand registry: which keys are wanted, by whom.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::types::{DemandSnapshot, Key, SubscriptionId};

/// Keys demanded per subscription.
///
/// Mutations are synchronous and bump a revision counter; [`run`] turns
/// revisions into debounced [`DemandSnapshot`]s.
#[derive(Debug)]
pub struct DemandRegistry {
    entries: DashMap<SubscriptionId, Vec<Key>>,
    next_id: AtomicU64,
    revision: watch::Sender<u64>,
}

impl Default for DemandRegistry {
    fn default() -> Self { Self::new() }
}

impl DemandRegistry {
    pub fn new() -> Self {
        Self { entries: DashMap::new(), next_id: AtomicU64::new(1), revision: watch::Sender::new(0) }
    }

    pub fn register(&self, keys: impl IntoIterator<Item = Key>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let keys: Vec<Key> = keys.into_iter().collect();
        trace!(subscription = id, keys = keys.len(), "Demand registered");
        self.entries.insert(id, keys);
        self.bump();
        id
    }

    /// Returns `false` if `id` was not registered, e.g. already unregistered.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let removed = self.entries.remove(&id).is_some();
        if removed {
            trace!(subscription = id, "Demand unregistered");
            self.bump();
        }
        removed
    }

    pub fn snapshot(&self) -> DemandSnapshot {
        DemandSnapshot::from_keys(self.entries.iter().flat_map(|entry| entry.value().clone()))
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Revision notifications, one per mutation.
    pub fn changes(&self) -> watch::Receiver<u64> { self.revision.subscribe() }

    fn bump(&self) { self.revision.send_modify(|revision| *revision += 1); }
}

/// Publishes the registry's snapshot into `output` whenever it changes.
///
/// The first mutation after start is published immediately; later ones are
/// coalesced until mutations quiesce for `debounce`. Structurally equal
/// snapshots are never republished.
pub fn run(
    registry: Arc<DemandRegistry>,
    output: watch::Sender<DemandSnapshot>,
    debounce: Duration,
    cancel: CancellationToken,
) -> impl Future<Output = ()> + Send + 'static {
    let mut changes = registry.changes();
    async move {
        let mut first = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                changed = changes.changed() => if changed.is_err() { return },
            }

            if !first {
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        changed = changes.changed() => if changed.is_err() { return },
                        _ = tokio::time::sleep(debounce) => break,
                    }
                }
            }
            first = false;

            let snapshot = registry.snapshot();
            let keys = snapshot.len();
            let published = output.send_if_modified(|current| {
                if *current == snapshot {
                    return false;
                }
                *current = snapshot;
                true
            });
            if published {
                debug!(keys, "Demand changed");
            }
        }
    }
}
