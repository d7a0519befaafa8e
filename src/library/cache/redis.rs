use super::{CacheBackend, CacheError, Ttl};
use crate::library::communication::implementation::redis::{
    RedisConnection, RedisConnectionVariant, RedisFactory,
};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

const PTTL_MISSING: i64 = -2;
const PTTL_PERSISTENT: i64 = -1;

/// [`CacheBackend`] implementation using plain redis strings
///
/// Expiry is handled by the server (`PSETEX`), entries without a TTL are stored using `SET`.
pub struct RedisCacheBackend<F> {
    factory: F,
}

impl<F> RedisCacheBackend<F>
where
    F: RedisFactory + Send + Sync,
{
    /// Creates a new instance with a given [`RedisFactory`]
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    async fn connection(&self) -> Result<RedisConnection, CacheError> {
        self.factory
            .connection(RedisConnectionVariant::Multiplexed)
            .await
            .map_err(CacheError::Unavailable)
    }
}

fn ttl_from_millis(pttl: i64) -> Option<Ttl> {
    match pttl {
        PTTL_MISSING => None,
        PTTL_PERSISTENT => Some(Ttl::Never),
        millis => Some(Ttl::After(Duration::from_millis(millis.max(0) as u64))),
    }
}

#[async_trait]
impl<F> CacheBackend for RedisCacheBackend<F>
where
    F: RedisFactory + Send + Sync,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut con = self.connection().await?;
        con.get(key).await.map_err(CacheError::unavailable)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), CacheError> {
        let mut con = self.connection().await?;

        match ttl.duration() {
            Some(duration) => {
                let millis = duration.as_millis().max(1) as usize;
                con.pset_ex(key, value, millis).await
            }
            None => con.set(key, value).await,
        }
        .map_err(CacheError::unavailable)
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        let mut con = self.connection().await?;
        let removed: usize = con.del(key).await.map_err(CacheError::unavailable)?;
        Ok(removed > 0)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Ttl>, CacheError> {
        let mut con = self.connection().await?;
        let pttl: i64 = con.pttl(key).await.map_err(CacheError::unavailable)?;
        Ok(ttl_from_millis(pttl))
    }
}
