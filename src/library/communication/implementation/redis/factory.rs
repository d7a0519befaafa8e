use crate::library::BoxedError;
use async_trait::async_trait;
use futures::FutureExt;
use redis::aio::{Connection, ConnectionLike, MultiplexedConnection, PubSub};
use redis::{Client, Cmd, Pipeline, RedisError, RedisFuture, RedisResult, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Upper bound for establishing a connection before giving up
const CONNECT_TIMEOUT: Duration = Duration::from_secs(4);

/// Variant for redis connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedisConnectionVariant {
    /// Individual connection that allows for blocking commands without disturbing other users
    Owned,
    /// Connection that is shared between multiple users and does not permit blocking commands
    Multiplexed,
}

/// Connection handed out by a [`RedisFactory`]
pub enum RedisConnection {
    /// See [`RedisConnectionVariant::Owned`]
    Owned(Connection),
    /// See [`RedisConnectionVariant::Multiplexed`]
    Multiplexed(SharedConnection),
}

/// Clone of the multiplexed connection held by a [`StandardRedisFactory`]
///
/// Once a command fails because the server went away, every clone is marked as broken and the
/// factory establishes a new connection for the next caller.
#[derive(Clone)]
pub struct SharedConnection {
    con: MultiplexedConnection,
    broken: Arc<AtomicBool>,
}

impl SharedConnection {
    fn new(con: MultiplexedConnection) -> Self {
        Self {
            con,
            broken: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn observe<T>(&self, result: &RedisResult<T>) {
        if let Err(error) = result {
            if is_disconnect(error) && !self.broken.swap(true, Ordering::SeqCst) {
                warn!(?error, "Shared redis connection lost");
            }
        }
    }
}

/// Whether an error indicates that the connection itself is unusable
fn is_disconnect(error: &RedisError) -> bool {
    error.is_connection_dropped()
        || error.is_io_error()
        || error.is_connection_refusal()
        || error.is_timeout()
}

impl ConnectionLike for SharedConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        (async move {
            let result = self.con.req_packed_command(cmd).await;
            self.observe(&result);
            result
        })
        .boxed()
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        (async move {
            let result = self.con.req_packed_commands(cmd, offset, count).await;
            self.observe(&result);
            result
        })
        .boxed()
    }

    fn get_db(&self) -> i64 {
        self.con.get_db()
    }
}

impl ConnectionLike for RedisConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            Self::Owned(con) => con.req_packed_command(cmd),
            Self::Multiplexed(con) => con.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            Self::Owned(con) => con.req_packed_commands(cmd, offset, count),
            Self::Multiplexed(con) => con.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            Self::Owned(con) => con.get_db(),
            Self::Multiplexed(con) => con.get_db(),
        }
    }
}

/// Factory for redis connections of different [types](RedisConnectionVariant)
#[async_trait]
pub trait RedisFactory {
    /// Creates a new PubSub connection
    async fn pubsub(&self) -> Result<PubSub, BoxedError>;

    /// Establishes a new connection or clones a shared one
    async fn connection(
        &self,
        variant: RedisConnectionVariant,
    ) -> Result<RedisConnection, BoxedError>;
}

#[async_trait]
impl<F> RedisFactory for Arc<F>
where
    F: RedisFactory + Send + Sync + ?Sized,
{
    async fn pubsub(&self) -> Result<PubSub, BoxedError> {
        (**self).pubsub().await
    }

    async fn connection(
        &self,
        variant: RedisConnectionVariant,
    ) -> Result<RedisConnection, BoxedError> {
        (**self).connection(variant).await
    }
}

/// [`RedisFactory`] opening connections to a single server
///
/// Multiplexed connections are established lazily and shared until the server drops them.
/// Every connection attempt is bounded by a timeout.
pub struct StandardRedisFactory {
    client: Client,
    shared: Mutex<Option<SharedConnection>>,
}

impl StandardRedisFactory {
    /// Creates a new factory for the given URL, e.g. `redis://localhost:6379/`
    ///
    /// No connection is made until one is requested.
    pub fn new(url: &str) -> Result<Self, RedisError> {
        Ok(Self {
            client: Client::open(url)?,
            shared: Mutex::new(None),
        })
    }

    async fn owned(&self) -> Result<Connection, BoxedError> {
        Ok(timeout(CONNECT_TIMEOUT, self.client.get_async_connection()).await??)
    }
}

#[async_trait]
impl RedisFactory for StandardRedisFactory {
    async fn pubsub(&self) -> Result<PubSub, BoxedError> {
        Ok(self.owned().await?.into_pubsub())
    }

    async fn connection(
        &self,
        variant: RedisConnectionVariant,
    ) -> Result<RedisConnection, BoxedError> {
        match variant {
            RedisConnectionVariant::Owned => Ok(RedisConnection::Owned(self.owned().await?)),
            RedisConnectionVariant::Multiplexed => {
                let mut shared = self.shared.lock().await;

                if let Some(con) = shared.as_ref().filter(|con| !con.is_broken()) {
                    return Ok(RedisConnection::Multiplexed(con.clone()));
                }

                debug!(reconnect = shared.is_some(), "Establishing shared redis connection");
                *shared = None;

                let con = timeout(
                    CONNECT_TIMEOUT,
                    self.client.get_multiplexed_tokio_connection(),
                )
                .await??;
                let con = SharedConnection::new(con);
                *shared = Some(con.clone());

                Ok(RedisConnection::Multiplexed(con))
            }
        }
    }
}
