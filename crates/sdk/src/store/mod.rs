//! Persistent, eventually consistent cache of last known values.
//!
//! The in-memory map is authoritative for the running session. The backend
//! only receives debounced copies of it, and every failure talking to the
//! backend is logged and swallowed.

mod backend;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

pub use backend::{Backend, FileBackend, MemoryBackend};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    codec,
    error::Result,
    types::{CacheValue, Key, ValueMap},
};

pub struct PersistentStore<V> {
    name: String,
    backend: Arc<dyn Backend>,
    values: watch::Sender<ValueMap<V>>,
}

impl<V: CacheValue> PersistentStore<V> {
    /// Loads the blob `name` from the backend.
    ///
    /// Never fails: an absent, unreadable or malformed blob yields an empty
    /// cache.
    pub fn load(name: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        let name = name.into();
        let values = match backend.get_item(&name) {
            Ok(Some(blob)) => match codec::decode::<ValueMap<V>>(&blob) {
                Ok(values) => {
                    debug!(namespace = %name, entries = values.len(), "Cache loaded");
                    values
                },
                Err(err) => {
                    warn!(namespace = %name, error = %err, "Malformed cache blob, starting empty");
                    ValueMap::new()
                },
            },
            Ok(None) => ValueMap::new(),
            Err(err) => {
                warn!(namespace = %name, error = %err, "Failed to read cache blob, starting empty");
                ValueMap::new()
            },
        };
        let (values, _) = watch::channel(values);
        Self { name, backend, values }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn get(&self, key: &Key) -> Option<V> { self.values.borrow().get(key).cloned() }

    /// Stores `value` under `key`.
    ///
    /// Returns `false` and notifies nobody when the stored value is already
    /// equal to `value`.
    pub fn set(&self, key: Key, value: V) -> bool {
        self.values.send_if_modified(|values| match values.get(&key) {
            Some(current) if *current == value => false,
            _ => {
                values.insert(key, value);
                true
            },
        })
    }

    pub fn snapshot(&self) -> ValueMap<V> { self.values.borrow().clone() }

    /// Change notifications; the receiver starts with the current contents
    /// marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<ValueMap<V>> { self.values.subscribe() }

    pub fn len(&self) -> usize { self.values.borrow().len() }

    pub fn is_empty(&self) -> bool { self.values.borrow().is_empty() }

    /// Writes the whole map to the backend, entries ordered by key.
    pub fn persist(&self) -> Result<()> {
        let blob = {
            let values = self.values.borrow();
            codec::encode(&values.iter().collect::<BTreeMap<_, _>>())?
        };
        self.backend.set_item(&self.name, &blob)
    }

    fn save(&self) {
        match self.persist() {
            Ok(()) => trace!(namespace = %self.name, "Cache persisted"),
            Err(err) => {
                warn!(namespace = %self.name, error = %err, "Failed to persist cache")
            },
        }
    }
}

/// Persists `store` once mutations quiesce for `debounce`, until `cancel`
/// fires; a change still pending at that point is flushed before returning.
///
/// Subscribes to changes eagerly, so mutations made between this call and the
/// first poll of the returned future are not missed.
pub fn run<V: CacheValue>(
    store: Arc<PersistentStore<V>>,
    debounce: Duration,
    cancel: CancellationToken,
) -> impl Future<Output = ()> + Send + 'static {
    let mut changes = store.subscribe();
    async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = changes.changed() => if changed.is_err() { break },
            }

            let mut cancelled = false;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    },
                    changed = changes.changed() => if changed.is_err() { break },
                    _ = tokio::time::sleep(debounce) => break,
                }
            }
            store.save();
            if cancelled {
                return;
            }
        }

        if changes.has_changed().unwrap_or(false) {
            store.save();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::{
        codec::{BigInt, Value},
        error::EngineError,
    };

    /// Counts writes and optionally fails them.
    #[derive(Default)]
    struct CountingBackend {
        inner: MemoryBackend,
        writes: AtomicUsize,
        failing: AtomicBool,
    }

    impl Backend for CountingBackend {
        fn get_item(&self, name: &str) -> Result<Option<String>> { self.inner.get_item(name) }

        fn set_item(&self, name: &str, value: &str) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(EngineError::Io(std::io::Error::other("disk full")));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set_item(name, value)
        }
    }

    fn key(k: &str) -> Key { Key::from(k) }

    #[test]
    fn load_tolerates_absent_and_malformed_blobs() {
        let backend = MemoryBackend::new();
        let store = PersistentStore::<BigInt>::load("balances", Arc::new(backend.clone()));
        assert!(store.is_empty());

        backend.set_item("balances", "{not json").unwrap();
        assert!(PersistentStore::<BigInt>::load("balances", Arc::new(backend.clone())).is_empty());

        backend.set_item("balances", r#"{"a":"bigint:zz"}"#).unwrap();
        assert!(PersistentStore::<BigInt>::load("balances", Arc::new(backend.clone())).is_empty());

        backend.set_item("balances", r#"{"a":"bigint:12","b":"bigint:-3"}"#).unwrap();
        let store = PersistentStore::<BigInt>::load("balances", Arc::new(backend));
        assert_eq!(store.get(&key("a")), Some(BigInt::from(12u64)));
        assert_eq!(store.get(&key("b")), Some(BigInt::from(-3i64)));
    }

    #[test]
    fn load_keeps_integers_wider_than_256_bits() {
        // 2^300.
        let wide = "2037035976334486086268445688409378161051468393665936250636140449354381299763336706183397376";
        let backend = MemoryBackend::new();
        backend.set_item("balances", &format!(r#"{{"small":"bigint:1","wide":"bigint:{wide}"}}"#)).unwrap();

        let store = PersistentStore::<Value>::load("balances", Arc::new(backend));
        assert_eq!(store.len(), 2);
        let loaded = store.get(&key("wide")).and_then(|value| value.as_bigint()).unwrap();
        assert_eq!(loaded.to_string(), wide);
        assert_eq!(loaded.to_u256(), None);
    }

    #[test]
    fn set_skips_equal_values() {
        let store = PersistentStore::<u64>::load("n", Arc::new(MemoryBackend::new()));
        let mut changes = store.subscribe();

        assert!(store.set(key("a"), 1));
        assert!(changes.has_changed().unwrap());
        changes.mark_unchanged();

        assert!(!store.set(key("a"), 1));
        assert!(!changes.has_changed().unwrap());
        assert!(store.set(key("a"), 2));
        assert_eq!(store.get(&key("a")), Some(2));
    }

    #[test]
    fn persisted_blob_is_ordered_by_key() {
        let backend = MemoryBackend::new();
        let store = PersistentStore::<BigInt>::load("b", Arc::new(backend.clone()));
        store.set(key("z"), BigInt::from(1u64));
        store.set(key("a"), BigInt::ZERO);
        store.persist().unwrap();
        assert_eq!(
            backend.get_item("b").unwrap().as_deref(),
            Some(r#"{"a":"bigint:0","z":"bigint:1"}"#)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_writes_is_persisted_once() {
        let backend = Arc::new(CountingBackend::default());
        let store = Arc::new(PersistentStore::<u64>::load("n", backend.clone()));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(store.clone(), Duration::from_secs(1), cancel.clone()));

        for i in 0..5 {
            store.set(key("a"), i);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(backend.writes.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(backend.writes.load(Ordering::SeqCst), 1);
        assert_eq!(backend.get_item("n").unwrap().as_deref(), Some(r#"{"a":4}"#));

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(backend.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_is_retried_on_next_change() {
        let backend = Arc::new(CountingBackend::default());
        backend.failing.store(true, Ordering::SeqCst);
        let store = Arc::new(PersistentStore::<u64>::load("n", backend.clone()));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(store.clone(), Duration::from_millis(100), cancel.clone()));

        store.set(key("a"), 1);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.get(&key("a")), Some(1));
        assert_eq!(backend.get_item("n").unwrap(), None);

        backend.failing.store(false, Ordering::SeqCst);
        store.set(key("b"), 2);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(backend.get_item("n").unwrap().as_deref(), Some(r#"{"a":1,"b":2}"#));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pending_change_is_flushed_on_cancel() {
        let backend = Arc::new(CountingBackend::default());
        let store = Arc::new(PersistentStore::<u64>::load("n", backend.clone()));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(store.clone(), Duration::from_secs(1), cancel.clone()));

        store.set(key("a"), 7);
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(backend.get_item("n").unwrap().as_deref(), Some(r#"{"a":7}"#));
    }
}
