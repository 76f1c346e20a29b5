//! Subscription engine wiring demand, watchers, cache and combined view.
//!
//! ```text
//! subscribe/unsubscribe ──> DemandRegistry ──debounce──> DemandSnapshot
//!                                                           │
//!                     RemoteSource <── WatcherManager <─────┤
//!                          │                 │ status       │
//!                          └─ values ──> PersistentStore    │
//!                                            │              │
//!                                   combiner (throttled) <──┘
//!                                            │
//!                                 observe / state / status
//! ```
//!
//! Every stage runs in its own task and talks to the next one over
//! [`tokio::sync::watch`] channels, so readers always see the latest state
//! and intermediate states may be skipped.

pub mod combiner;
pub mod demand;
pub mod watcher;

use std::{collections::BTreeSet, sync::Arc};

use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use self::{
    combiner::CombinerInputs,
    demand::DemandRegistry,
    watcher::{OpenFirst, WatcherManager},
};
use crate::{
    config::EngineConfig,
    error::Result,
    source::RemoteSource,
    store::{self, Backend, MemoryBackend, PersistentStore},
    types::{CacheValue, CombinedMap, DemandSnapshot, Key, Status, StatusMap, SubscriptionId},
};

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "default";

pub struct EngineBuilder<V> {
    source: Arc<dyn RemoteSource<Value = V>>,
    namespace: String,
    backend: Arc<dyn Backend>,
    config: EngineConfig,
    open_first: Option<OpenFirst<V>>,
}

impl<V: CacheValue> EngineBuilder<V> {
    pub fn new(source: impl RemoteSource<Value = V>) -> Self {
        Self {
            source: Arc::new(source),
            namespace: DEFAULT_NAMESPACE.to_string(),
            backend: Arc::new(MemoryBackend::new()),
            config: EngineConfig::default(),
            open_first: None,
        }
    }

    /// Name of the persisted cache blob. Engines sharing a backend must use
    /// distinct namespaces.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn backend(mut self, backend: impl Backend) -> Self {
        self.backend = Arc::new(backend);
        self
    }

    /// Rejects configs with a zero window, see [`EngineConfig::validate`].
    pub fn config(mut self, config: EngineConfig) -> Result<Self> {
        self.config = config.validate()?;
        Ok(self)
    }

    /// Keys whose cached value satisfies `open_first` are opened ahead of
    /// others in each reconciliation. Defaults to any cached value.
    pub fn open_first(mut self, open_first: impl Fn(&V) -> bool + Send + Sync + 'static) -> Self {
        self.open_first = Some(Arc::new(open_first));
        self
    }

    /// Loads the cache and starts the engine tasks on the current runtime.
    ///
    /// # Panics
    ///
    /// Outside of a tokio runtime.
    pub fn start(self) -> Engine<V> {
        let Self { source, namespace, backend, config, open_first } = self;
        let cancel = CancellationToken::new();

        let store = Arc::new(PersistentStore::load(namespace.clone(), backend));
        let registry = Arc::new(DemandRegistry::new());
        let (demand_tx, demand_rx) = watch::channel(DemandSnapshot::default());

        let mut manager = WatcherManager::new(source, store.clone());
        if let Some(open_first) = open_first {
            manager = manager.with_open_first(open_first);
        }
        let status_rx = manager.status_updates();
        let watched_rx = manager.watched_updates();

        let (combined_tx, combined_rx) = watch::channel(Arc::new(combiner::combine(
            &DemandSnapshot::default(),
            &StatusMap::new(),
            &store.snapshot(),
        )));
        let inputs = CombinerInputs {
            demand: demand_rx.clone(),
            status: status_rx.clone(),
            values: store.subscribe(),
        };

        let tasks = vec![
            tokio::spawn(demand::run(
                registry.clone(),
                demand_tx,
                config.demand_debounce(),
                cancel.clone(),
            )),
            tokio::spawn(manager.run(demand_rx.clone(), cancel.clone())),
            tokio::spawn(combiner::run(inputs, combined_tx, config.combine_throttle(), cancel.clone())),
            tokio::spawn(store::run(store.clone(), config.persist_debounce(), cancel.clone())),
        ];

        debug!(namespace = %namespace, cached = store.len(), "Engine started");
        Engine {
            registry,
            store,
            demand: demand_rx,
            status: status_rx,
            watched: watched_rx,
            combined: combined_rx,
            cancel,
            tasks,
        }
    }
}

/// Running subscription engine.
///
/// Dropping the engine stops its tasks without waiting for them; use
/// [`Engine::shutdown`] to also wait for the final cache flush.
pub struct Engine<V> {
    registry: Arc<DemandRegistry>,
    store: Arc<PersistentStore<V>>,
    demand: watch::Receiver<DemandSnapshot>,
    status: watch::Receiver<StatusMap>,
    watched: watch::Receiver<BTreeSet<Key>>,
    combined: watch::Receiver<Arc<CombinedMap<V>>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<V: CacheValue> Engine<V> {
    pub fn builder(source: impl RemoteSource<Value = V>) -> EngineBuilder<V> { EngineBuilder::new(source) }

    pub fn namespace(&self) -> &str { self.store.name() }

    /// Demands `keys` until the returned guard is dropped.
    pub fn subscribe<K: Into<Key>>(&self, keys: impl IntoIterator<Item = K>) -> Subscription {
        Subscription::new(self.registry.clone(), keys.into_iter().map(Into::into))
    }

    /// Removes a demand entry by ID; `false` if it is already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool { self.registry.unregister(id) }

    /// Live view of `keys`.
    ///
    /// Keys are demanded from the first poll of the stream until it is
    /// dropped. Yields the current view first, then every distinct change.
    /// Keys never seen by the engine read as stale without a value. Ends when
    /// the engine stops.
    pub fn observe<K: Into<Key>>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> BoxStream<'static, CombinedMap<V>> {
        let observer = Observer {
            registry: self.registry.clone(),
            keys: keys.into_iter().map(Into::into).collect(),
            combined: self.combined.clone(),
            subscription: None,
            last: None,
        };

        stream::unfold(observer, |mut observer| async move {
            if observer.subscription.is_none() {
                observer.subscription =
                    Some(Subscription::new(observer.registry.clone(), observer.keys.iter().cloned()));
                observer.combined.mark_changed();
            }
            loop {
                observer.combined.changed().await.ok()?;
                let view = project(&observer.combined.borrow_and_update(), &observer.keys);
                if observer.last.as_ref() != Some(&view) {
                    observer.last = Some(view.clone());
                    return Some((view, observer));
                }
            }
        })
        .boxed()
    }

    /// Latest combined view of `keys`, without demanding them.
    pub fn state<K: Into<Key>>(&self, keys: impl IntoIterator<Item = K>) -> CombinedMap<V> {
        let keys: Vec<Key> = keys.into_iter().map(Into::into).collect();
        project(&self.combined.borrow(), &keys)
    }

    /// Latest combined view of every demanded or cached key.
    pub fn snapshot(&self) -> Arc<CombinedMap<V>> { self.combined.borrow().clone() }

    pub fn status(&self, key: &Key) -> Status { self.status.borrow().get(key).copied().unwrap_or_default() }

    pub fn cached(&self, key: &Key) -> Option<V> { self.store.get(key) }

    /// Keys with a live or establishing watcher.
    pub fn watched_keys(&self) -> Vec<Key> { self.watched.borrow().iter().cloned().collect() }

    /// Latest published demand.
    pub fn demand(&self) -> DemandSnapshot { self.demand.borrow().clone() }

    /// Stops the engine: closes every watcher and waits for the final cache
    /// flush.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(err) = task.await {
                warn!(error = %err, "Engine task failed");
            }
        }
        debug!(namespace = %self.store.name(), "Engine stopped");
    }
}

impl<V> Drop for Engine<V> {
    fn drop(&mut self) { self.cancel.cancel(); }
}

fn project<V: Clone>(combined: &CombinedMap<V>, keys: &[Key]) -> CombinedMap<V> {
    keys.iter().map(|key| (key.clone(), combined.get(key).cloned().unwrap_or_default())).collect()
}

struct Observer<V> {
    registry: Arc<DemandRegistry>,
    keys: Vec<Key>,
    combined: watch::Receiver<Arc<CombinedMap<V>>>,
    subscription: Option<Subscription>,
    last: Option<CombinedMap<V>>,
}

/// Demand entry of an [`Engine`], unregistered on drop.
#[derive(derive_more::Debug)]
#[must_use = "keys are only demanded while the subscription is alive"]
pub struct Subscription {
    id: SubscriptionId,
    #[debug(skip)]
    registry: Arc<DemandRegistry>,
}

impl Subscription {
    fn new(registry: Arc<DemandRegistry>, keys: impl IntoIterator<Item = Key>) -> Self {
        Self { id: registry.register(keys), registry }
    }

    pub fn id(&self) -> SubscriptionId { self.id }
}

impl Drop for Subscription {
    fn drop(&mut self) { self.registry.unregister(self.id); }
}
