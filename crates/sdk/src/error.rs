use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure reported by a remote data source for a single key.
///
/// Never escapes the engine: the affected key degrades to
/// [`crate::types::Status::Stale`] and the error is logged.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("remote request failed: {0}")]
    Remote(String),

    #[error("remote did not settle within {0:?}")]
    Timeout(Duration),

    #[error("unsupported by this source: {0}")]
    Unsupported(String),
}

impl SourceError {
    pub fn remote(err: impl std::fmt::Display) -> Self { Self::Remote(err.to_string()) }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// Tagged value in a cache blob could not be decoded.
    #[error("codec: {0}")]
    Codec(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
