use super::{CacheError, Ttl};
use async_trait::async_trait;
use std::sync::Arc;

/// Key-value storage holding the cached bytes
///
/// Keys passed to the backend are already namespaced by the [`Cache`](super::Cache).
/// Implementations must never return an entry whose TTL has elapsed.
#[async_trait]
pub trait CacheBackend {
    /// Retrieves an unexpired value
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Unconditionally stores a value, replacing any previous one and its TTL
    async fn set(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), CacheError>;

    /// Removes a value and returns whether it existed
    async fn del(&self, key: &str) -> Result<bool, CacheError>;

    /// Remaining lifetime of a value, `None` if it does not exist
    async fn ttl(&self, key: &str) -> Result<Option<Ttl>, CacheError>;
}

#[async_trait]
impl<B> CacheBackend for Arc<B>
where
    B: CacheBackend + Send + Sync + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), CacheError> {
        (**self).set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        (**self).del(key).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Ttl>, CacheError> {
        (**self).ttl(key).await
    }
}
