use super::super::super::broadcast::{BroadcastChannel, BroadcastPublisher};
use super::{RedisConnectionVariant, RedisFactory};
use crate::library::helpers::Backoff;
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::PubSub;
use redis::AsyncCommands;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Errors that may occur while relaying messages
#[derive(Error, Debug)]
pub enum RelayError {
    /// Underlying pubsub connection has been closed
    #[error("redis pubsub connection has been closed")]
    StreamClosed,
}

/// [`BroadcastPublisher`] implementation using [`PUBLISH`](https://redis.io/commands/publish)
#[derive(Clone)]
pub struct RedisBroadcastPublisher<F> {
    factory: F,
}

impl<F> RedisBroadcastPublisher<F>
where
    F: RedisFactory + Send + Sync,
{
    /// Creates a new instance with a given [`RedisFactory`]
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl<F> BroadcastPublisher for RedisBroadcastPublisher<F>
where
    F: RedisFactory + Send + Sync,
{
    async fn broadcast(&self, topic: &str, payload: &[u8]) -> Result<usize, BoxedError> {
        let mut con = self
            .factory
            .connection(RedisConnectionVariant::Multiplexed)
            .await?;

        let receivers: usize = con.publish(topic, payload).await?;
        trace!(topic, receivers, "Broadcast message");

        Ok(receivers)
    }
}

/// Forwards messages received through [`SUBSCRIBE`](https://redis.io/commands/subscribe) into a local [`BroadcastChannel`]
///
/// This extends the fan-out of a channel across process boundaries. Listeners subscribe to the
/// local channel as usual while publishers use a [`RedisBroadcastPublisher`].
pub struct RedisBroadcastRelay<F> {
    factory: F,
    channel: BroadcastChannel,
    topics: Vec<String>,
}

impl<F> RedisBroadcastRelay<F>
where
    F: RedisFactory + Send + Sync,
{
    /// Creates a new relay for the given topics
    pub fn new(factory: F, channel: BroadcastChannel, topics: Vec<String>) -> Self {
        Self {
            factory,
            channel,
            topics,
        }
    }

    /// Relays messages until the connection is lost
    pub async fn relay(&self) -> EmptyResult {
        let pubsub = self.subscribe().await?;
        self.forward(pubsub).await
    }

    async fn subscribe(&self) -> Result<PubSub, BoxedError> {
        let mut pubsub = self.factory.pubsub().await?;

        for topic in self.topics.iter() {
            pubsub.subscribe(topic).await?;
        }

        info!(topics = ?self.topics, "Relaying broadcasts");

        Ok(pubsub)
    }

    async fn forward(&self, mut pubsub: PubSub) -> EmptyResult {
        let mut messages = pubsub.on_message();
        while let Some(message) = messages.next().await {
            let topic = message.get_channel_name();
            let report = self
                .channel
                .publish(topic, message.get_payload_bytes())
                .await;

            trace!(
                topic,
                delivered = report.delivered,
                failed = report.failed,
                "Relayed message"
            );
        }

        Err(RelayError::StreamClosed.into())
    }

    /// Relays messages forever, reconnecting with an exponential backoff after failures
    ///
    /// The backoff starts over whenever subscribing succeeded.
    pub async fn relay_forever(&self) {
        let mut backoff = Backoff::default();

        loop {
            let subscribed = match self.subscribe().await {
                Ok(pubsub) => {
                    if let Err(error) = self.forward(pubsub).await {
                        warn!(?error, "Broadcast relay interrupted");
                    }
                    true
                }
                Err(error) => {
                    warn!(?error, "Unable to subscribe to broadcasts");
                    false
                }
            };

            let delay = reconnect_delay(&mut backoff, subscribed);
            debug!(?delay, "Reconnecting broadcast relay");
            tokio::time::sleep(delay).await;
        }
    }
}

fn reconnect_delay(backoff: &mut Backoff, subscribed: bool) -> Duration {
    if subscribed {
        backoff.reset();
    }

    backoff.next().unwrap_or_default()
}
