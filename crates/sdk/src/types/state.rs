use std::fmt;

use serde::{Deserialize, Serialize};

/// Watcher status of a key.
///
/// `Stale` is both the initial status and the status after the key's watcher
/// was torn down, by a close or a failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Watcher is being established, no value received yet.
    Loading,
    /// Watcher is live and has emitted at least once.
    Loaded,
    #[default]
    Stale,
}

impl Status {
    pub fn is_loaded(&self) -> bool { matches!(self, Status::Loaded) }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Loading => "loading",
            Status::Loaded => "loaded",
            Status::Stale => "stale",
        })
    }
}

/// Consumer view of a single key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombinedState<V> {
    pub status: Status,
    pub value: Option<V>,
}

impl<V> Default for CombinedState<V> {
    fn default() -> Self { Self { status: Status::Stale, value: None } }
}

impl<V> CombinedState<V> {
    pub fn new(status: Status, value: Option<V>) -> Self { Self { status, value } }
}
