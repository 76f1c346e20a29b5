//! Scriptable in-memory [`RemoteSource`] for tests.
//!
//! ```no_run
//! # async fn example() {
//! use keysub::{EngineBuilder, testing::MockSource};
//!
//! let source = MockSource::<u64>::new().with_initial("a", 1);
//! let engine = EngineBuilder::new(source.clone()).start();
//! let _subscription = engine.subscribe(["a"]);
//! // ...
//! source.emit("a", 2);
//! # }
//! ```

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use futures::{
    FutureExt, StreamExt,
    channel::{
        mpsc::{self, UnboundedSender},
        oneshot,
    },
    future::{self, BoxFuture},
};

use crate::{
    error::SourceError,
    source::{RemoteSource, WatchStream},
    types::Key,
};

type Update<V> = Result<V, SourceError>;

/// Remote source driven by the test.
///
/// Clones share state, so a test keeps one clone to script emissions while
/// the engine owns another.
pub struct MockSource<V> {
    state: Arc<Mutex<MockState<V>>>,
}

struct MockState<V> {
    initial: HashMap<Key, V>,
    failing: HashSet<Key>,
    held: HashSet<Key>,
    waiting: HashMap<Key, Vec<oneshot::Sender<()>>>,
    watches: HashMap<Key, Vec<UnboundedSender<Update<V>>>>,
    opened: HashMap<Key, usize>,
}

impl<V> Clone for MockSource<V> {
    fn clone(&self) -> Self { Self { state: self.state.clone() } }
}

impl<V: Clone + Send + 'static> Default for MockSource<V> {
    fn default() -> Self { Self::new() }
}

impl<V: Clone + Send + 'static> MockSource<V> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                initial: HashMap::new(),
                failing: HashSet::new(),
                held: HashSet::new(),
                waiting: HashMap::new(),
                watches: HashMap::new(),
                opened: HashMap::new(),
            })),
        }
    }

    /// Value emitted by every new watch of `key` right after it opens.
    pub fn with_initial(self, key: impl Into<Key>, value: V) -> Self {
        self.set_initial(key, value);
        self
    }

    pub fn set_initial(&self, key: impl Into<Key>, value: V) {
        self.state().initial.insert(key.into(), value);
    }

    /// Makes new watches of `key` fail to open.
    pub fn fail_on_open(&self, key: impl Into<Key>) { self.state().failing.insert(key.into()); }

    /// Keeps new watches of `key` establishing until [`MockSource::release`].
    pub fn hold(&self, key: impl Into<Key>) { self.state().held.insert(key.into()); }

    /// Completes establishment of held watches of `key`.
    pub fn release(&self, key: impl Into<Key>) {
        let key = key.into();
        let mut state = self.state();
        state.held.remove(&key);
        for waiting in state.waiting.remove(&key).unwrap_or_default() {
            _ = waiting.send(());
        }
    }

    /// Pushes `value` to every live watch of `key`; returns how many there
    /// are.
    pub fn emit(&self, key: impl Into<Key>, value: V) -> usize {
        self.push(key.into(), || Ok(value.clone()))
    }

    /// Ends every live watch of `key` with `error`.
    pub fn fail(&self, key: impl Into<Key>, error: SourceError) -> usize {
        let key = key.into();
        let reached = self.push(key.clone(), || Err(error.clone()));
        self.state().watches.remove(&key);
        reached
    }

    /// Ends every live watch of `key` without an error.
    pub fn close(&self, key: impl Into<Key>) { self.state().watches.remove(&key.into()); }

    /// Number of watches of `key` ever requested.
    pub fn opened(&self, key: impl Into<Key>) -> usize {
        self.state().opened.get(&key.into()).copied().unwrap_or_default()
    }

    /// Number of watches of `key` not disposed by their consumer, including
    /// ones still establishing.
    pub fn active(&self, key: impl Into<Key>) -> usize {
        self.state()
            .watches
            .get(&key.into())
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }

    pub fn active_total(&self) -> usize {
        self.state().watches.values().flatten().filter(|tx| !tx.is_closed()).count()
    }

    /// Keys with at least one active watch, sorted.
    pub fn active_keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .state()
            .watches
            .iter()
            .filter(|(_, senders)| senders.iter().any(|tx| !tx.is_closed()))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn push(&self, key: Key, update: impl Fn() -> Update<V>) -> usize {
        let mut state = self.state();
        let Some(senders) = state.watches.get_mut(&key) else {
            return 0;
        };
        senders.retain(|tx| tx.unbounded_send(update()).is_ok());
        senders.len()
    }

    fn state(&self) -> MutexGuard<'_, MockState<V>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<V: Clone + Send + 'static> RemoteSource for MockSource<V> {
    type Value = V;

    fn watch(&self, key: &Key) -> BoxFuture<'static, Result<WatchStream<V>, SourceError>> {
        let mut state = self.state();
        *state.opened.entry(key.clone()).or_default() += 1;

        if state.failing.contains(key) {
            return future::ready(Err(SourceError::Remote(format!("cannot watch {key}")))).boxed();
        }

        let (tx, rx) = mpsc::unbounded();
        if let Some(value) = state.initial.get(key) {
            _ = tx.unbounded_send(Ok(value.clone()));
        }
        state.watches.entry(key.clone()).or_default().push(tx);

        if !state.held.contains(key) {
            return future::ready(Ok(rx.boxed())).boxed();
        }
        let (release, released) = oneshot::channel();
        state.waiting.entry(key.clone()).or_default().push(release);
        async move {
            released.await.map_err(|_| SourceError::Remote("mock dropped".to_string()))?;
            Ok(rx.boxed())
        }
        .boxed()
    }
}
