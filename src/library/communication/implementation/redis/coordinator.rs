use super::super::super::event::{
    GroupCoordinator, GroupInfo, PendingEntry, Record, Sequence, StartOffset,
};
use super::super::super::StreamError;
use super::{
    block_millis, parse_sequence, record_from_entry, stream_error, RedisConnection,
    RedisConnectionVariant, RedisFactory, STREAM_ID_ADDITIONS, STREAM_ID_HEAD, STREAM_ID_MAX,
    STREAM_ID_MIN, STREAM_ID_TAIL,
};
use async_trait::async_trait;
use redis::streams::{
    StreamClaimReply, StreamInfoGroupsReply, StreamPendingCountReply, StreamPendingReply,
    StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};

const NO_DELIVERY_ID: &str = "0-0";

/// [`GroupCoordinator`] implementation delegating the bookkeeping to Redis consumer groups
///
/// - Groups are created with [`XGROUP CREATE … MKSTREAM`](https://redis.io/commands/xgroup)
/// - New records are claimed with [`XREADGROUP`](https://redis.io/commands/xreadgroup)
/// - Stale records are taken over with [`XPENDING`](https://redis.io/commands/xpending) and [`XCLAIM`](https://redis.io/commands/xclaim)
///
/// Blocking reads require a dedicated connection. One is kept per consumer and reused between polls.
pub struct RedisCoordinator<F> {
    factory: F,
    blocking: Mutex<HashMap<String, RedisConnection>>,
}

impl<F> RedisCoordinator<F>
where
    F: RedisFactory + Send + Sync,
{
    /// Creates a new instance with a given [`RedisFactory`]
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            blocking: Mutex::new(HashMap::new()),
        }
    }

    async fn shared_connection(&self) -> Result<RedisConnection, StreamError> {
        self.factory
            .connection(RedisConnectionVariant::Multiplexed)
            .await
            .map_err(StreamError::StoreUnavailable)
    }

    async fn blocking_connection(&self, consumer: &str) -> Result<RedisConnection, StreamError> {
        if let Some(con) = self.blocking.lock().await.remove(consumer) {
            return Ok(con);
        }

        self.factory
            .connection(RedisConnectionVariant::Owned)
            .await
            .map_err(StreamError::StoreUnavailable)
    }

    async fn release_blocking_connection(&self, consumer: &str, con: RedisConnection) {
        self.blocking.lock().await.insert(consumer.to_owned(), con);
    }

    async fn read_group(
        &self,
        con: &mut RedisConnection,
        stream: &str,
        group: &str,
        options: &StreamReadOptions,
    ) -> Result<Vec<Record>, StreamError> {
        let reply: Option<StreamReadReply> = con
            .xread_options(&[stream], &[STREAM_ID_ADDITIONS], options)
            .await
            .map_err(|e| stream_error(e, stream, group))?;

        reply
            .map(|reply| reply.keys)
            .unwrap_or_default()
            .iter()
            .flat_map(|key| key.ids.iter())
            .map(|entry| record_from_entry(stream, entry))
            .collect()
    }
}

#[async_trait]
impl<F> GroupCoordinator for RedisCoordinator<F>
where
    F: RedisFactory + Send + Sync,
{
    async fn try_create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartOffset,
    ) -> Result<(), StreamError> {
        let start_id = match start {
            StartOffset::Head => STREAM_ID_HEAD,
            StartOffset::Tail => STREAM_ID_TAIL,
        };

        let mut con = self.shared_connection().await?;
        con.xgroup_create_mkstream::<_, _, _, ()>(stream, group, start_id)
            .await
            .map_err(|e| stream_error(e, stream, group))
    }

    async fn claim_next(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<Record>, StreamError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count);

        match block_millis(block) {
            Some(block) => {
                let options = options.block(block);
                let mut con = self.blocking_connection(consumer).await?;
                let records = self.read_group(&mut con, stream, group, &options).await;

                // Connections which failed are in an unknown state, drop them
                if records.is_ok() {
                    self.release_blocking_connection(consumer, con).await;
                }

                records
            }
            None => {
                let mut con = self.shared_connection().await?;
                self.read_group(&mut con, stream, group, &options).await
            }
        }
    }

    async fn acknowledge(
        &self,
        stream: &str,
        group: &str,
        sequence: Sequence,
    ) -> Result<bool, StreamError> {
        let mut con = self.shared_connection().await?;
        let result: Result<usize, _> = con.xack(stream, group, &[sequence.to_string()]).await;

        match result.map_err(|e| stream_error(e, stream, group)) {
            Ok(acknowledged) => Ok(acknowledged > 0),
            Err(StreamError::UnknownGroup { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn reclaim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        idle_threshold: Duration,
        count: usize,
    ) -> Result<Vec<Record>, StreamError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let threshold = idle_threshold.as_millis() as usize;
        let mut con = self.shared_connection().await?;

        let pending: StreamPendingCountReply = con
            .xpending_count(stream, group, STREAM_ID_MIN, STREAM_ID_MAX, count)
            .await
            .map_err(|e| stream_error(e, stream, group))?;

        let stale: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|entry| entry.last_delivered_ms >= threshold)
            .map(|entry| entry.id)
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let claimed: StreamClaimReply = con
            .xclaim(stream, group, consumer, threshold, &stale)
            .await
            .map_err(|e| stream_error(e, stream, group))?;

        // Entries claimed by a peer in the meantime or trimmed from the stream are not returned.
        // Redis 7 and newer drop trimmed entries from the PEL while claiming.
        if claimed.ids.len() < stale.len() {
            debug!(
                stream,
                group,
                skipped = stale.len() - claimed.ids.len(),
                "Some stale records could not be claimed"
            );
        }

        trace!(
            stream,
            group,
            consumer,
            count = claimed.ids.len(),
            "Claimed stale records"
        );

        claimed
            .ids
            .iter()
            .map(|entry| record_from_entry(stream, entry))
            .collect()
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>, StreamError> {
        let mut con = self.shared_connection().await?;

        let summary: StreamPendingReply = con
            .xpending(stream, group)
            .await
            .map_err(|e| stream_error(e, stream, group))?;

        let total = summary.count();
        if total == 0 {
            return Ok(Vec::new());
        }

        let reply: StreamPendingCountReply = con
            .xpending_count(stream, group, STREAM_ID_MIN, STREAM_ID_MAX, total)
            .await
            .map_err(|e| stream_error(e, stream, group))?;

        reply
            .ids
            .into_iter()
            .map(|entry| {
                Ok(PendingEntry {
                    sequence: parse_sequence(&entry.id)?,
                    consumer: entry.consumer,
                    delivery_count: entry.times_delivered as u64,
                    idle: Duration::from_millis(entry.last_delivered_ms as u64),
                })
            })
            .collect()
    }

    async fn group_info(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<Option<GroupInfo>, StreamError> {
        let mut con = self.shared_connection().await?;

        let exists: bool = con
            .exists(stream)
            .await
            .map_err(StreamError::unavailable)?;

        if !exists {
            return Ok(None);
        }

        let reply: StreamInfoGroupsReply = con
            .xinfo_groups(stream)
            .await
            .map_err(|e| stream_error(e, stream, group))?;

        reply
            .groups
            .into_iter()
            .find(|info| info.name == group)
            .map(|info| {
                let cursor = match info.last_delivered_id.as_str() {
                    NO_DELIVERY_ID => None,
                    id => Some(parse_sequence(id)?),
                };

                Ok(GroupInfo {
                    cursor,
                    pending: info.pending,
                })
            })
            .transpose()
    }
}
