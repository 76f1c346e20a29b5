use std::time::Duration;

use futures::{
    FutureExt, StreamExt,
    future::{self, BoxFuture},
    stream,
};

use super::{RemoteSource, WatchStream};
use crate::{error::SourceError, types::Key};

/// Outer timeout for sources that may hang while connecting.
///
/// Bounds both the acquisition of the watch and the wait for its first
/// emission; later emissions are not bounded.
pub struct Timeout<S> {
    inner: S,
    duration: Duration,
}

impl<S> Timeout<S> {
    pub fn new(inner: S, duration: Duration) -> Self { Self { inner, duration } }

    pub fn into_inner(self) -> S { self.inner }
}

impl<S: RemoteSource> RemoteSource for Timeout<S> {
    type Value = S::Value;

    fn watch(&self, key: &Key) -> BoxFuture<'static, Result<WatchStream<S::Value>, SourceError>> {
        let duration = self.duration;
        let opening = self.inner.watch(key);
        async move {
            let watch = tokio::time::timeout(duration, opening)
                .await
                .map_err(|_| SourceError::Timeout(duration))??;
            Ok(first_within(watch, duration))
        }
        .boxed()
    }
}

fn first_within<V: Send + 'static>(mut watch: WatchStream<V>, duration: Duration) -> WatchStream<V> {
    let first = async move {
        let first = tokio::time::timeout(duration, watch.next()).await;
        match first {
            Ok(Some(item)) => stream::once(future::ready(item)).chain(watch).boxed(),
            Ok(None) => stream::empty().boxed(),
            Err(_) => stream::once(future::ready(Err(SourceError::Timeout(duration)))).boxed(),
        }
    };
    stream::once(first).flatten().boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceExt, from_fn};

    #[tokio::test(start_paused = true)]
    async fn hanging_acquisition_times_out() {
        let source = from_fn(|_key: Key| async {
            future::pending::<()>().await;
            Ok(stream::empty::<Result<u64, SourceError>>().boxed())
        })
        .with_timeout(Duration::from_secs(5));

        let err = source.watch(&Key::from("k")).await.err();
        assert_eq!(err, Some(SourceError::Timeout(Duration::from_secs(5))));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_watch_times_out_on_first_emission() {
        let source = from_fn(|_key: Key| async {
            Ok(stream::pending::<Result<u64, SourceError>>().boxed())
        })
        .with_timeout(Duration::from_secs(5));

        let mut watch = source.watch(&Key::from("k")).await.unwrap();
        assert_eq!(watch.next().await, Some(Err(SourceError::Timeout(Duration::from_secs(5)))));
    }

    #[tokio::test(start_paused = true)]
    async fn later_emissions_are_not_bounded() {
        let source = from_fn(|_key: Key| async {
            let delayed = stream::iter([1u64, 2]).then(|n| async move {
                if n == 2 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(n)
            });
            Ok(delayed.boxed())
        })
        .with_timeout(Duration::from_secs(5));

        let items: Vec<_> = source.watch(&Key::from("k")).await.unwrap().collect().await;
        assert_eq!(items, [Ok(1), Ok(2)]);
    }
}
