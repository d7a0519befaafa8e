use super::{CacheBackend, CacheError, Ttl};
use async_trait::async_trait;
use lru::LruCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, trace};

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// In-process [`CacheBackend`] with lazy expiry
///
/// Expired entries are dropped when they are read. Use [`purge_expired`](MemoryCacheBackend::purge_expired)
/// or a [sweeper](MemoryCacheBackend::spawn_sweeper) to reclaim their memory earlier.
/// When created with a capacity, the least recently used entries are evicted once it is exceeded.
pub struct MemoryCacheBackend {
    entries: Mutex<LruCache<String, MemoryEntry>>,
}

impl MemoryCacheBackend {
    /// Creates a backend without a size limit
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
        }
    }

    /// Creates a backend holding at most `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Removes all expired entries and returns how many there were
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired.iter() {
            entries.pop(key);
        }

        expired.len()
    }

    /// Periodically purges expired entries until the returned task is aborted
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let purged = self.purge_expired().await;

                if purged > 0 {
                    debug!(purged, "Purged expired cache entries");
                }
            }
        })
    }

    /// Number of stored entries, including expired ones that have not been purged yet
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no entries are stored
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Default for MemoryCacheBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let key = key.to_owned();
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let expired = match entries.peek(&key) {
            Some(entry) => entry.is_expired(now),
            None => return Ok(None),
        };

        if expired {
            trace!(%key, "Dropping expired cache entry");
            entries.pop(&key);
            Ok(None)
        } else {
            Ok(entries.get(&key).map(|entry| entry.value.clone()))
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), CacheError> {
        let entry = MemoryEntry {
            value: value.to_vec(),
            expires_at: ttl.duration().map(|duration| Instant::now() + duration),
        };

        self.entries.lock().await.put(key.to_owned(), entry);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.lock().await.pop(&key.to_owned()).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Ttl>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;

        let ttl = entries
            .peek(&key.to_owned())
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| match entry.expires_at {
                Some(at) => Ttl::After(at.saturating_duration_since(now)),
                None => Ttl::Never,
            });

        Ok(ttl)
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::advance;

    #[tokio::test]
    async fn expire_entries_lazily() {
        tokio::time::pause();
        let backend = MemoryCacheBackend::new();

        backend
            .set("key", b"value", Ttl::After(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(backend.get("key").await.unwrap(), Some(b"value".to_vec()));

        advance(Duration::from_secs(3)).await;

        assert_eq!(backend.get("key").await.unwrap(), None);
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn keep_entries_without_ttl() {
        tokio::time::pause();
        let backend = MemoryCacheBackend::new();

        backend.set("key", b"value", Ttl::Never).await.unwrap();
        advance(Duration::from_secs(3600)).await;

        assert_eq!(backend.get("key").await.unwrap(), Some(b"value".to_vec()));
        assert_eq!(backend.ttl("key").await.unwrap(), Some(Ttl::Never));
    }

    #[tokio::test]
    async fn reset_ttl_on_overwrite() {
        tokio::time::pause();
        let backend = MemoryCacheBackend::new();
        let ttl = Ttl::After(Duration::from_secs(2));

        backend.set("key", b"first", ttl).await.unwrap();
        advance(Duration::from_millis(1500)).await;
        backend.set("key", b"second", ttl).await.unwrap();
        advance(Duration::from_millis(1500)).await;

        assert_eq!(backend.get("key").await.unwrap(), Some(b"second".to_vec()));
        assert_eq!(
            backend.ttl("key").await.unwrap(),
            Some(Ttl::After(Duration::from_millis(500)))
        );
    }

    #[tokio::test]
    async fn purge_expired_entries() {
        tokio::time::pause();
        let backend = MemoryCacheBackend::new();

        backend
            .set("short", b"1", Ttl::After(Duration::from_secs(1)))
            .await
            .unwrap();
        backend.set("long", b"2", Ttl::Never).await.unwrap();
        advance(Duration::from_secs(2)).await;

        assert_eq!(backend.purge_expired().await, 1);
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn sweep_in_background() {
        tokio::time::pause();
        let backend = Arc::new(MemoryCacheBackend::new());
        let sweeper = backend.clone().spawn_sweeper(Duration::from_secs(1));

        backend
            .set("key", b"value", Ttl::After(Duration::from_millis(500)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(backend.is_empty().await);
        sweeper.abort();
    }

    #[tokio::test]
    async fn evict_least_recently_used_entries() {
        let backend = MemoryCacheBackend::with_capacity(2);

        backend.set("a", b"1", Ttl::Never).await.unwrap();
        backend.set("b", b"2", Ttl::Never).await.unwrap();
        backend.get("a").await.unwrap();
        backend.set("c", b"3", Ttl::Never).await.unwrap();

        assert!(backend.get("a").await.unwrap().is_some());
        assert!(backend.get("b").await.unwrap().is_none());
        assert!(backend.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ignore_eviction_of_missing_keys() {
        let backend = MemoryCacheBackend::new();

        assert!(!backend.del("missing").await.unwrap());
        assert_eq!(backend.ttl("missing").await.unwrap(), None);
    }
}
