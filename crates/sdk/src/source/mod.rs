//! Remote data source contract and adapters.
//!
//! A watch is opened per key and is a stream of value updates. Dropping the
//! stream disposes the remote subscription, including before the first
//! emission. An error item ends the watch from the engine's perspective.

mod poll;
mod timeout;

use futures::{future::BoxFuture, stream::BoxStream};
pub use poll::PollSource;
pub use timeout::Timeout;

use crate::{error::SourceError, types::Key};

pub type WatchStream<V> = BoxStream<'static, Result<V, SourceError>>;

pub trait RemoteSource: Send + Sync + 'static {
    type Value: Send + 'static;

    /// Opens a live watch of `key`.
    ///
    /// The returned future resolves once the remote subscription is
    /// established. The engine imposes no timeout; see
    /// [`SourceExt::with_timeout`].
    fn watch(&self, key: &Key) -> BoxFuture<'static, Result<WatchStream<Self::Value>, SourceError>>;
}

/// Push source built from a closure opening one watch per key.
pub struct FnSource<F> {
    open: F,
}

pub fn from_fn<V, F, Fut>(open: F) -> FnSource<F>
where
    F: Fn(Key) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WatchStream<V>, SourceError>> + Send + 'static,
    V: Send + 'static,
{
    FnSource { open }
}

impl<V, F, Fut> RemoteSource for FnSource<F>
where
    F: Fn(Key) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WatchStream<V>, SourceError>> + Send + 'static,
    V: Send + 'static,
{
    type Value = V;

    fn watch(&self, key: &Key) -> BoxFuture<'static, Result<WatchStream<V>, SourceError>> {
        Box::pin((self.open)(key.clone()))
    }
}

pub trait SourceExt: RemoteSource + Sized {
    /// Fails watches whose acquisition or first emission takes longer than
    /// `duration`.
    fn with_timeout(self, duration: std::time::Duration) -> Timeout<Self> {
        Timeout::new(self, duration)
    }
}

impl<S: RemoteSource> SourceExt for S {}
