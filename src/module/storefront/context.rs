use crate::library::cache::{CacheBackend, MemoryCacheBackend, RedisCacheBackend};
use crate::library::communication::broadcast::{BroadcastChannel, BroadcastPublisher};
use crate::library::communication::event::{AppendLog, GroupCoordinator, LogCoordinator};
use crate::library::communication::implementation::memory::MemoryLog;
use crate::library::communication::implementation::redis::{
    RedisBroadcastPublisher, RedisBroadcastRelay, RedisCoordinator, RedisLog, StandardRedisFactory,
};
use crate::library::BoxedError;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Shared handle to the log records are appended to
pub type SharedLog = Arc<dyn AppendLog + Send + Sync>;
/// Shared handle to the consumer group bookkeeping
pub type SharedCoordinator = Arc<dyn GroupCoordinator + Send + Sync>;
/// Shared handle to the cache storage
pub type SharedCacheBackend = Arc<dyn CacheBackend + Send + Sync>;
/// Shared handle to the broadcast publisher
pub type SharedBroadcastPublisher = Arc<dyn BroadcastPublisher + Send + Sync>;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Storage backends used by all storefront services
#[derive(Clone)]
pub struct Context {
    /// Append log for all streams
    pub log: SharedLog,
    /// Consumer group bookkeeping on top of [`log`](Context::log)
    pub coordinator: SharedCoordinator,
    /// Backend for caches and keyspaces
    pub cache: SharedCacheBackend,
    /// Publisher reaching the listeners of [`channel`](Context::channel)
    pub broadcast: SharedBroadcastPublisher,
    /// Local channel listeners subscribe to
    pub channel: BroadcastChannel,
    relay: Option<Arc<RedisBroadcastRelay<Arc<StandardRedisFactory>>>>,
}

impl Context {
    /// Keeps everything within the current process
    pub fn in_memory() -> Self {
        info!("Using in-memory backends");

        let log = Arc::new(MemoryLog::default());
        let cache = Arc::new(MemoryCacheBackend::new());
        cache.clone().spawn_sweeper(SWEEP_INTERVAL);

        let channel = BroadcastChannel::new();

        Self {
            coordinator: Arc::new(LogCoordinator::new(log.clone())),
            log,
            cache,
            broadcast: Arc::new(channel.clone()),
            channel,
            relay: None,
        }
    }

    /// Connects to a Redis server
    ///
    /// Broadcasts on `topics` are relayed from the server into the local channel once
    /// [`relay`](Context::relay) is running.
    pub fn redis(url: &str, topics: Vec<String>) -> Result<Self, BoxedError> {
        info!(url, "Using redis backends");

        let factory = Arc::new(StandardRedisFactory::new(url)?);
        let channel = BroadcastChannel::new();
        let relay = RedisBroadcastRelay::new(factory.clone(), channel.clone(), topics);

        Ok(Self {
            log: Arc::new(RedisLog::new(factory.clone())),
            coordinator: Arc::new(RedisCoordinator::new(factory.clone())),
            cache: Arc::new(RedisCacheBackend::new(factory.clone())),
            broadcast: Arc::new(RedisBroadcastPublisher::new(factory)),
            channel,
            relay: Some(Arc::new(relay)),
        })
    }

    /// Relay which has to run for remote broadcasts to reach local listeners
    pub fn relay(&self) -> Option<Arc<RedisBroadcastRelay<Arc<StandardRedisFactory>>>> {
        self.relay.clone()
    }
}
