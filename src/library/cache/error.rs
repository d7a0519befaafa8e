use crate::library::BoxedError;
use thiserror::Error;

/// Failures surfaced by the cache layer
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backend could not be reached or refused the operation
    #[error("cache backend unavailable")]
    Unavailable(#[source] BoxedError),
    /// Cached value could not be converted from or into its typed representation
    #[error("unable to (de-)serialize cached value")]
    Serialization(#[from] serde_json::Error),
    /// Loader of a read-through lookup failed, nothing has been cached
    #[error("loader failed to produce a value")]
    Loader(#[source] BoxedError),
}

impl CacheError {
    /// Wraps an arbitrary error as [`CacheError::Unavailable`]
    pub fn unavailable<E: Into<BoxedError>>(error: E) -> Self {
        Self::Unavailable(error.into())
    }
}
