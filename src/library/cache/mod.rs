//! Read-through caching with per-entry expiry
//!
//! A [`Cache`] namespaces its keys (`<name>::<key>`) and stores raw bytes in a [`CacheBackend`].
//! Lookups that miss may be backed by a loader, concurrent misses for the same key are collapsed
//! into a single loader invocation. Values written with a [`Ttl`] become unreadable once it elapsed,
//! regardless of whether the backend already reclaimed them.
//!
//! For strongly typed values, [`Cache::cached`] wraps a loader function so that every call site
//! transparently goes through the cache, similar to a memoizing decorator.

mod backend;
mod error;
mod keyspace;
mod memory;
mod redis;
mod ttl;

pub use backend::CacheBackend;
pub use error::CacheError;
pub use keyspace::{Keyspace, KeyspaceEntity};
pub use memory::MemoryCacheBackend;
pub use self::redis::RedisCacheBackend;
pub use ttl::Ttl;

use crate::library::BoxedError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace};

type KeyLock = tokio::sync::Mutex<()>;

/// Named cache on top of a [`CacheBackend`]
pub struct Cache<B> {
    name: String,
    backend: B,
    default_ttl: Ttl,
    loading: Mutex<HashMap<String, Weak<KeyLock>>>,
}

impl<B> Cache<B>
where
    B: CacheBackend + Send + Sync,
{
    /// Creates a new cache whose entries expire after `default_ttl` unless stated otherwise
    pub fn new(name: impl Into<String>, backend: B, default_ttl: Ttl) -> Self {
        Self {
            name: name.into(),
            backend,
            default_ttl,
            loading: Mutex::new(HashMap::new()),
        }
    }

    /// Name used to namespace keys
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lifetime applied by read-through lookups
    pub fn default_ttl(&self) -> Ttl {
        self.default_ttl
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}::{}", self.name, key)
    }

    /// Retrieves an unexpired value, `None` being a miss
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let value = self.backend.get(&self.namespaced(key)).await?;
        trace!(cache = %self.name, key, hit = value.is_some(), "Cache lookup");
        Ok(value)
    }

    /// Unconditionally stores a value, resetting its lifetime
    ///
    /// Waits for a loader running on the same key so that its result can not overwrite this value.
    pub async fn put(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), CacheError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        self.store(key, value, ttl).await
    }

    /// Removes a value immediately, missing keys are ignored
    ///
    /// Like [`put`](Self::put), this is ordered after a loader running on the same key.
    pub async fn evict(&self, key: &str) -> Result<(), CacheError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let existed = self.backend.del(&self.namespaced(key)).await?;
        trace!(cache = %self.name, key, existed, "Evicted cache entry");
        Ok(())
    }

    /// Remaining lifetime of a value, `None` if it is not cached
    pub async fn ttl(&self, key: &str) -> Result<Option<Ttl>, CacheError> {
        self.backend.ttl(&self.namespaced(key)).await
    }

    /// Retrieves a value or, on a miss, loads and stores it with the default lifetime
    ///
    /// Only one loader runs at a time for any given key. Callers arriving while it runs wait for it
    /// and are served from the cache afterwards. A failing loader caches nothing.
    pub async fn get_or_load<F, Fut>(&self, key: &str, loader: F) -> Result<Vec<u8>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, BoxedError>>,
    {
        self.load(key, self.default_ttl, loader).await
    }

    async fn load<F, Fut>(&self, key: &str, ttl: Ttl, loader: F) -> Result<Vec<u8>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, BoxedError>>,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        // Another caller may have loaded the value while we were waiting
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        debug!(cache = %self.name, key, "Loading value on cache miss");
        let value = loader().await.map_err(CacheError::Loader)?;
        self.store(key, &value, ttl).await?;

        Ok(value)
    }

    /// Writes without taking the key lock, callers have to hold it
    async fn store(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), CacheError> {
        self.backend.set(&self.namespaced(key), value, ttl).await
    }

    fn key_lock(&self, key: &str) -> Arc<KeyLock> {
        let mut loading = self
            .loading
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(lock) = loading.get(key).and_then(Weak::upgrade) {
            return lock;
        }

        loading.retain(|_, lock| lock.strong_count() > 0);

        let lock = Arc::new(KeyLock::new(()));
        loading.insert(key.to_owned(), Arc::downgrade(&lock));
        lock
    }

    /// Retrieves and deserializes a value using [`serde_json`]
    pub async fn get_json<T>(&self, key: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
    {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Serializes a value using [`serde_json`] and stores it
    pub async fn put_json<T>(&self, key: &str, value: &T, ttl: Ttl) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, &bytes, ttl).await
    }

    /// Wraps a loader so that its results are cached
    ///
    /// `key_fn` derives the cache key from the loader argument. The returned [`Cached`] behaves
    /// like the loader itself but only invokes it on a miss.
    pub fn cached<A, T, K, L>(
        self: &Arc<Self>,
        key_fn: K,
        loader: L,
        ttl: Ttl,
    ) -> Cached<B, K, L, A, T>
    where
        K: Fn(&A) -> String,
    {
        Cached {
            cache: self.clone(),
            key_fn,
            loader,
            ttl,
            marker: PhantomData,
        }
    }
}

/// Loader function whose results are transparently cached, created by [`Cache::cached`]
pub struct Cached<B, K, L, A, T> {
    cache: Arc<Cache<B>>,
    key_fn: K,
    loader: L,
    ttl: Ttl,
    marker: PhantomData<fn(A) -> T>,
}

impl<B, K, L, A, T> Cached<B, K, L, A, T>
where
    B: CacheBackend + Send + Sync,
    K: Fn(&A) -> String,
    T: Serialize + DeserializeOwned,
{
    /// Returns the cached result for the argument, invoking the loader on a miss
    pub async fn call<Fut>(&self, argument: A) -> Result<T, CacheError>
    where
        L: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, BoxedError>>,
    {
        let key = (self.key_fn)(&argument);
        let loader = &self.loader;

        let bytes = self
            .cache
            .load(&key, self.ttl, || async move {
                let value = loader(argument).await?;
                Ok::<_, BoxedError>(serde_json::to_vec(&value)?)
            })
            .await?;

        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Writes a value through to the cache without invoking the loader
    pub async fn put(&self, argument: &A, value: &T) -> Result<(), CacheError> {
        let key = (self.key_fn)(argument);
        self.cache.put_json(&key, value, self.ttl).await
    }

    /// Removes the cached result for an argument
    pub async fn evict(&self, argument: &A) -> Result<(), CacheError> {
        let key = (self.key_fn)(argument);
        self.cache.evict(&key).await
    }

    /// Underlying cache
    pub fn cache(&self) -> &Cache<B> {
        &self.cache
    }
}
