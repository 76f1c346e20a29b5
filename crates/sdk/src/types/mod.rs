mod key;
mod state;

use std::collections::{BTreeMap, HashMap};

use serde::{Serialize, de::DeserializeOwned};

pub use key::{DemandSnapshot, Key};
pub use state::{CombinedState, Status};

/// ID of a demand entry, see [`crate::Engine::subscribe`].
pub type SubscriptionId = u64;

/// Per-key watcher status, owned by the watcher manager.
pub type StatusMap = HashMap<Key, Status>;

/// Per-key last known values, owned by the persistent store.
pub type ValueMap<V> = HashMap<Key, V>;

/// Per-key view exposed to consumers, ordered by key.
pub type CombinedMap<V> = BTreeMap<Key, CombinedState<V>>;

/// Values an engine can cache and persist.
pub trait CacheValue: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<V> CacheValue for V where V: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {}
