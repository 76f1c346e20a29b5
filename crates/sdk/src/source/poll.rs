use std::{sync::Arc, time::Duration};

use futures::{
    FutureExt, StreamExt,
    future::{self, BoxFuture},
    stream,
};

use super::{RemoteSource, WatchStream};
use crate::{error::SourceError, types::Key};

/// Fixed-interval refetch adapter for remotes without live push.
///
/// The first fetch runs immediately, the following ones every `interval`
/// after the previous fetch completed. A failed fetch is emitted as an error
/// item, which ends the watch.
pub struct PollSource<F> {
    fetch: Arc<F>,
    interval: Duration,
}

impl<F> PollSource<F> {
    pub fn new(fetch: F, interval: Duration) -> Self { Self { fetch: Arc::new(fetch), interval } }

    pub fn interval(&self) -> Duration { self.interval }
}

impl<V, F, Fut> RemoteSource for PollSource<F>
where
    F: Fn(Key) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, SourceError>> + Send + 'static,
    V: Send + 'static,
{
    type Value = V;

    fn watch(&self, key: &Key) -> BoxFuture<'static, Result<WatchStream<V>, SourceError>> {
        let interval = self.interval;
        let polls = stream::unfold(
            (self.fetch.clone(), key.clone(), true),
            move |(fetch, key, first)| async move {
                if !first {
                    tokio::time::sleep(interval).await;
                }
                let result = fetch(key.clone()).await;
                Some((result, (fetch, key, false)))
            },
        );
        future::ready(Ok(polls.boxed())).boxed()
    }
}
