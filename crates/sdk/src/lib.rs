//! Key subscription engine.
//!
//! # Overview
//!
//! Multiplexes live subscriptions to remote data keyed by string keys, with a
//! persistent cache of last known values.
//!
//! Consumers declare interest in keys with [`Engine::subscribe`] or
//! [`Engine::observe`]. The engine keeps exactly one live watch per demanded
//! key on a [`source::RemoteSource`], regardless of how many consumers
//! demand it, and tears watches down when the last consumer goes away.
//! Values are kept in a [`store::PersistentStore`] that outlives watches and
//! restarts, so consumers see the last known value (marked
//! [`types::Status::Stale`]) before the live one arrives.
//!
//! See `./tests` for examples.
//!
//! # Limitations/follow-ups
//!
//! * Cached values of keys that are no longer demanded are kept forever;
//!   there is no eviction policy yet.
//!
//! * A watch that fails is retried only at the next reconciliation that
//!   still demands its key, there is no backoff-driven retry.
//!
//! # Features
//!
//! | Feature | Default | Description |
//! | --- | --- | --- |
//! | `testing` | yes | Enables [`testing`] module. |
//!
//! # Configuration
//!
//! Timing windows are described by [`config::EngineConfig`], loadable from a
//! TOML file and `KEYSUB__*` environment variables.

pub mod codec;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod source;
pub mod store;
#[cfg(feature = "testing")]
pub mod testing;
pub mod types;

pub use engine::{Engine, EngineBuilder, Subscription};
pub use error::{EngineError, Result, SourceError};
pub use types::{CombinedState, Key, Status};
