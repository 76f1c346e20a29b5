//! Watcher manager: keeps exactly one live remote watch per demanded key.
//!
//! Reconciliation is a pure diff ([`plan`]) applied by [`WatcherManager`].
//! Each opened watch runs in its own task tagged with a generation; events of
//! a superseded generation are discarded, so a key closed and reopened in
//! quick succession never sees values from its previous watch.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use futures::StreamExt;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    error::SourceError,
    source::RemoteSource,
    store::PersistentStore,
    types::{CacheValue, DemandSnapshot, Key, Status, StatusMap},
};

/// Decides whether a key with a cached value is opened ahead of the others
/// during a reconciliation.
pub type OpenFirst<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;

/// Keys to open and close to move the watched set to the demanded set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub to_open: Vec<Key>,
    pub to_close: Vec<Key>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool { self.to_open.is_empty() && self.to_close.is_empty() }
}

/// Diffs demanded keys against watched keys. Both lists come out sorted.
pub fn plan<'a>(demanded: &DemandSnapshot, watched: impl IntoIterator<Item = &'a Key>) -> Reconciliation {
    let watched: BTreeSet<&Key> = watched.into_iter().collect();
    Reconciliation {
        to_open: demanded.iter().filter(|key| !watched.contains(key)).cloned().collect(),
        to_close: watched.into_iter().filter(|key| !demanded.contains(key)).cloned().collect(),
    }
}

#[derive(Debug)]
enum WatcherEventKind<V> {
    Emitted(V),
    Failed(SourceError),
    Ended,
}

#[derive(Debug)]
struct WatcherEvent<V> {
    key: Key,
    generation: u64,
    kind: WatcherEventKind<V>,
}

struct Slot {
    generation: u64,
    task: JoinHandle<()>,
}

pub struct WatcherManager<V> {
    source: Arc<dyn RemoteSource<Value = V>>,
    store: Arc<PersistentStore<V>>,
    open_first: Option<OpenFirst<V>>,
    status: watch::Sender<StatusMap>,
    watched: watch::Sender<BTreeSet<Key>>,
    slots: HashMap<Key, Slot>,
    next_generation: u64,
    events_tx: mpsc::UnboundedSender<WatcherEvent<V>>,
    events_rx: mpsc::UnboundedReceiver<WatcherEvent<V>>,
}

impl<V: CacheValue> WatcherManager<V> {
    pub fn new(source: Arc<dyn RemoteSource<Value = V>>, store: Arc<PersistentStore<V>>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            source,
            store,
            open_first: None,
            status: watch::Sender::new(StatusMap::new()),
            watched: watch::Sender::new(BTreeSet::new()),
            slots: HashMap::new(),
            next_generation: 0,
            events_tx,
            events_rx,
        }
    }

    /// Replaces the default priority, which opens every key with a cached
    /// value first.
    pub fn with_open_first(mut self, open_first: OpenFirst<V>) -> Self {
        self.open_first = Some(open_first);
        self
    }

    pub fn status_updates(&self) -> watch::Receiver<StatusMap> { self.status.subscribe() }

    pub fn watched_updates(&self) -> watch::Receiver<BTreeSet<Key>> { self.watched.subscribe() }

    pub fn watched(&self) -> BTreeSet<Key> { self.slots.keys().cloned().collect() }

    /// Closes watchers of keys no longer demanded, then opens watchers of
    /// newly demanded keys, prioritized ones first.
    pub fn reconcile(&mut self, demand: &DemandSnapshot) -> Reconciliation {
        let plan = plan(demand, self.slots.keys());
        if plan.is_empty() {
            return plan;
        }

        for key in &plan.to_close {
            self.close(key);
        }
        self.set_status(plan.to_close.iter().cloned(), Status::Stale);

        let mut to_open = plan.to_open.clone();
        to_open.sort_by_cached_key(|key| !self.opens_first(key));
        for key in &to_open {
            self.open(key.clone());
        }
        self.set_status(to_open, Status::Loading);

        self.publish_watched();
        debug!(opened = plan.to_open.len(), closed = plan.to_close.len(), "Watchers reconciled");
        plan
    }

    /// Tears down every watcher, e.g. on shutdown.
    pub fn close_all(&mut self) {
        let keys: Vec<Key> = self.slots.keys().cloned().collect();
        for key in &keys {
            self.close(key);
        }
        self.set_status(keys, Status::Stale);
        self.publish_watched();
    }

    fn opens_first(&self, key: &Key) -> bool {
        self.store.get(key).is_some_and(|value| match &self.open_first {
            Some(open_first) => open_first(&value),
            None => true,
        })
    }

    fn open(&mut self, key: Key) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let opening = self.source.watch(&key);
        let events = self.events_tx.clone();
        let task_key = key.clone();

        let task = tokio::spawn(async move {
            let kind = match opening.await {
                Err(err) => WatcherEventKind::Failed(err),
                Ok(mut updates) => loop {
                    match updates.next().await {
                        Some(Ok(value)) => {
                            let event = WatcherEvent {
                                key: task_key.clone(),
                                generation,
                                kind: WatcherEventKind::Emitted(value),
                            };
                            if events.send(event).is_err() {
                                return;
                            }
                        },
                        Some(Err(err)) => break WatcherEventKind::Failed(err),
                        None => break WatcherEventKind::Ended,
                    }
                },
            };
            _ = events.send(WatcherEvent { key: task_key, generation, kind });
        });

        trace!(key = %key, generation, "Watcher opened");
        if let Some(previous) = self.slots.insert(key, Slot { generation, task }) {
            previous.task.abort();
        }
    }

    fn close(&mut self, key: &Key) -> bool {
        match self.slots.remove(key) {
            Some(slot) => {
                slot.task.abort();
                trace!(key = %key, generation = slot.generation, "Watcher closed");
                true
            },
            None => false,
        }
    }

    fn handle(&mut self, event: WatcherEvent<V>) {
        let WatcherEvent { key, generation, kind } = event;
        if self.slots.get(&key).is_none_or(|slot| slot.generation != generation) {
            trace!(key = %key, generation, "Discarding event of superseded watcher");
            return;
        }

        match kind {
            WatcherEventKind::Emitted(value) => {
                self.store.set(key.clone(), value);
                self.set_status([key], Status::Loaded);
            },
            WatcherEventKind::Failed(err) => {
                warn!(key = %key, error = %err, "Watcher failed");
                self.slots.remove(&key);
                self.set_status([key], Status::Stale);
                self.publish_watched();
            },
            WatcherEventKind::Ended => {
                debug!(key = %key, "Watch ended by remote");
                self.slots.remove(&key);
                self.set_status([key], Status::Stale);
                self.publish_watched();
            },
        }
    }

    fn set_status(&self, keys: impl IntoIterator<Item = Key>, status: Status) {
        self.status.send_if_modified(|statuses| {
            let mut modified = false;
            for key in keys {
                if statuses.insert(key, status) != Some(status) {
                    modified = true;
                }
            }
            modified
        });
    }

    fn publish_watched(&self) {
        let watched = self.watched();
        self.watched.send_if_modified(|current| {
            if *current == watched {
                return false;
            }
            *current = watched;
            true
        });
    }

    /// Follows `demand` until `cancel` fires, then tears every watcher down.
    ///
    /// A key whose watcher failed or ended stays unwatched until the next
    /// reconciliation that still demands it.
    pub fn run(
        mut self,
        mut demand: watch::Receiver<DemandSnapshot>,
        cancel: CancellationToken,
    ) -> impl Future<Output = ()> + Send + 'static {
        async move {
            let initial = demand.borrow_and_update().clone();
            self.reconcile(&initial);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    changed = demand.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = demand.borrow_and_update().clone();
                        self.reconcile(&snapshot);
                    },
                    Some(event) = self.events_rx.recv() => self.handle(event),
                }
            }

            self.close_all();
        }
    }
}

impl<V> Drop for WatcherManager<V> {
    fn drop(&mut self) {
        for slot in self.slots.values() {
            slot.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::stream;

    use super::*;
    use crate::{
        source::{WatchStream, from_fn},
        store::MemoryBackend,
    };

    fn keys(keys: &[&str]) -> Vec<Key> { keys.iter().map(|k| Key::from(*k)).collect() }

    fn set(k: &[&str]) -> BTreeSet<Key> { keys(k).into_iter().collect() }

    fn demand(k: &[&str]) -> DemandSnapshot { DemandSnapshot::from_keys(keys(k)) }

    /// Source whose watches never emit, recording the order keys are opened in.
    fn recording_source(opened: Arc<Mutex<Vec<Key>>>) -> Arc<dyn RemoteSource<Value = u64>> {
        Arc::new(from_fn(move |key: Key| {
            opened.lock().unwrap().push(key);
            async { Ok::<WatchStream<u64>, SourceError>(stream::pending().boxed()) }
        }))
    }

    fn store() -> Arc<PersistentStore<u64>> {
        Arc::new(PersistentStore::load("test", Arc::new(MemoryBackend::new())))
    }

    #[test]
    fn plan_diffs_demand_against_watched() {
        let watched = keys(&["a", "b", "c"]);
        let plan = plan(&demand(&["b", "d", "c", "e"]), &watched);
        assert_eq!(plan.to_open, keys(&["d", "e"]));
        assert_eq!(plan.to_close, keys(&["a"]));

        assert!(super::plan(&demand(&["a"]), &keys(&["a"])).is_empty());
        assert_eq!(super::plan(&DemandSnapshot::default(), &watched).to_close, watched);
    }

    #[tokio::test]
    async fn cached_keys_open_first() {
        let opened = Arc::new(Mutex::new(Vec::new()));
        let store = store();
        store.set(Key::from("c"), 3);
        store.set(Key::from("d"), 0);

        let mut manager = WatcherManager::new(recording_source(opened.clone()), store.clone());
        manager.reconcile(&demand(&["a", "b", "c", "d"]));
        assert_eq!(*opened.lock().unwrap(), keys(&["c", "d", "a", "b"]));

        opened.lock().unwrap().clear();
        manager.reconcile(&DemandSnapshot::default());
        let mut manager = manager.with_open_first(Arc::new(|value: &u64| *value > 0));
        manager.reconcile(&demand(&["a", "b", "c", "d"]));
        assert_eq!(*opened.lock().unwrap(), keys(&["c", "a", "b", "d"]));
    }

    #[tokio::test]
    async fn statuses_follow_reconciliation() {
        let opened = Arc::new(Mutex::new(Vec::new()));
        let mut manager = WatcherManager::new(recording_source(opened), store());
        let status = manager.status_updates();

        manager.reconcile(&demand(&["a", "b"]));
        assert_eq!(status.borrow().get(&Key::from("a")), Some(&Status::Loading));
        assert_eq!(manager.watched(), set(&["a", "b"]));

        manager.reconcile(&demand(&["b"]));
        assert_eq!(status.borrow().get(&Key::from("a")), Some(&Status::Stale));
        assert_eq!(status.borrow().get(&Key::from("b")), Some(&Status::Loading));

        manager.close_all();
        assert!(manager.watched().is_empty());
        assert_eq!(status.borrow().get(&Key::from("b")), Some(&Status::Stale));
    }

    #[tokio::test]
    async fn superseded_generation_is_discarded() {
        let opened = Arc::new(Mutex::new(Vec::new()));
        let store = store();
        let mut manager = WatcherManager::new(recording_source(opened), store.clone());
        let a = Key::from("a");

        manager.reconcile(&demand(&["a"]));
        let stale_generation = manager.slots[&a].generation;
        manager.reconcile(&DemandSnapshot::default());
        manager.reconcile(&demand(&["a"]));
        let live_generation = manager.slots[&a].generation;
        assert_ne!(stale_generation, live_generation);

        manager.handle(WatcherEvent {
            key: a.clone(),
            generation: stale_generation,
            kind: WatcherEventKind::Emitted(1),
        });
        assert_eq!(store.get(&a), None);
        assert_eq!(manager.status_updates().borrow().get(&a), Some(&Status::Loading));

        manager.handle(WatcherEvent {
            key: a.clone(),
            generation: stale_generation,
            kind: WatcherEventKind::Failed(SourceError::Remote("gone".into())),
        });
        assert!(manager.watched().contains(&a));

        manager.handle(WatcherEvent {
            key: a.clone(),
            generation: live_generation,
            kind: WatcherEventKind::Emitted(2),
        });
        assert_eq!(store.get(&a), Some(2));
        assert_eq!(manager.status_updates().borrow().get(&a), Some(&Status::Loaded));
    }

    #[tokio::test]
    async fn failure_drops_watcher_and_keeps_value() {
        let opened = Arc::new(Mutex::new(Vec::new()));
        let store = store();
        let mut manager = WatcherManager::new(recording_source(opened.clone()), store.clone());
        let a = Key::from("a");

        manager.reconcile(&demand(&["a", "b"]));
        let generation = manager.slots[&a].generation;
        manager.handle(WatcherEvent { key: a.clone(), generation, kind: WatcherEventKind::Emitted(5) });
        manager.handle(WatcherEvent {
            key: a.clone(),
            generation,
            kind: WatcherEventKind::Failed(SourceError::Remote("boom".into())),
        });

        assert_eq!(manager.watched(), set(&["b"]));
        assert_eq!(manager.status_updates().borrow().get(&a), Some(&Status::Stale));
        assert_eq!(store.get(&a), Some(5));

        // Still demanded: reopened on the next reconciliation.
        manager.reconcile(&demand(&["a", "b", "c"]));
        assert_eq!(opened.lock().unwrap().iter().filter(|k| **k == a).count(), 2);
    }
}
