//! Joins demand, watcher statuses and cached values into the per-key view
//! published to consumers.

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::types::{CacheValue, CombinedMap, CombinedState, DemandSnapshot, StatusMap, ValueMap};

/// Combined view over every demanded or cached key.
///
/// A key without a recorded status is [`crate::types::Status::Stale`]; a key
/// without a cached value has `value: None`.
pub fn combine<V: Clone>(demand: &DemandSnapshot, status: &StatusMap, values: &ValueMap<V>) -> CombinedMap<V> {
    demand
        .iter()
        .chain(values.keys())
        .map(|key| {
            let state = CombinedState::new(
                status.get(key).copied().unwrap_or_default(),
                values.get(key).cloned(),
            );
            (key.clone(), state)
        })
        .collect()
}

/// Receivers feeding the combiner.
pub struct CombinerInputs<V> {
    pub demand: watch::Receiver<DemandSnapshot>,
    pub status: watch::Receiver<StatusMap>,
    pub values: watch::Receiver<ValueMap<V>>,
}

impl<V: Clone> CombinerInputs<V> {
    fn combine(&mut self) -> CombinedMap<V> {
        let demand = self.demand.borrow_and_update();
        let status = self.status.borrow_and_update();
        let values = self.values.borrow_and_update();
        combine(&demand, &status, &values)
    }

    fn has_changed(&self) -> bool {
        [self.demand.has_changed(), self.status.has_changed(), self.values.has_changed()]
            .into_iter()
            .any(|changed| changed.unwrap_or(false))
    }

    /// Waits for any input to change; `false` once an input is gone.
    async fn changed(&mut self) -> bool {
        tokio::select! {
            changed = self.demand.changed() => changed.is_ok(),
            changed = self.status.changed() => changed.is_ok(),
            changed = self.values.changed() => changed.is_ok(),
        }
    }
}

/// Publishes the combined view into `output`, at most once per `throttle`.
///
/// The first change after a quiet period is published right away and the
/// latest state at the end of the window is always published, so the final
/// state is never lost. Unchanged views are not republished.
pub fn run<V: CacheValue>(
    mut inputs: CombinerInputs<V>,
    output: watch::Sender<Arc<CombinedMap<V>>>,
    throttle: Duration,
    cancel: CancellationToken,
) -> impl Future<Output = ()> + Send + 'static {
    async move {
        publish(&output, inputs.combine());

        'idle: loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                alive = inputs.changed() => if !alive { break },
            }
            publish(&output, inputs.combine());

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'idle,
                    _ = tokio::time::sleep(throttle) => {},
                }
                if !inputs.has_changed() {
                    break;
                }
                publish(&output, inputs.combine());
            }
        }
    }
}

fn publish<V: PartialEq>(output: &watch::Sender<Arc<CombinedMap<V>>>, combined: CombinedMap<V>) {
    let keys = combined.len();
    let published = output.send_if_modified(|current| {
        if **current == combined {
            return false;
        }
        *current = Arc::new(combined);
        true
    });
    if published {
        trace!(keys, "Combined state published");
    }
}
