use super::super::super::event::{AppendLog, Record, Sequence};
use super::super::super::StreamError;
use super::{
    block_millis, parse_sequence, record_from_entry, RedisConnection, RedisConnectionVariant,
    RedisFactory, STREAM_ID_HEAD, STREAM_ID_MAX, STREAM_ID_MIN, STREAM_ID_NEW, STREAM_PAYLOAD_KEY,
};
use async_trait::async_trait;
use redis::streams::{StreamMaxlen, StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;

/// [`AppendLog`] implementation using [Redis Streams](https://redis.io/topics/streams-intro)
///
/// Sequences are the entry ids assigned by the server.
#[derive(Clone)]
pub struct RedisLog<F> {
    factory: F,
}

impl<F> RedisLog<F>
where
    F: RedisFactory + Send + Sync,
{
    /// Creates a new instance with a given [`RedisFactory`]
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    async fn connection(
        &self,
        variant: RedisConnectionVariant,
    ) -> Result<RedisConnection, StreamError> {
        self.factory
            .connection(variant)
            .await
            .map_err(StreamError::StoreUnavailable)
    }
}

/// First id strictly greater than the given sequence, usable as an inclusive range start
fn exclusive_start(after: Option<Sequence>) -> String {
    match after {
        Some(sequence) => match sequence.minor().checked_add(1) {
            Some(minor) => Sequence::new(sequence.major(), minor),
            None => Sequence::new(sequence.major().saturating_add(1), 0),
        }
        .to_string(),
        None => STREAM_ID_MIN.to_string(),
    }
}

#[async_trait]
impl<F> AppendLog for RedisLog<F>
where
    F: RedisFactory + Send + Sync,
{
    async fn append(
        &self,
        stream: &str,
        payload: &[u8],
        limit: Option<usize>,
    ) -> Result<Sequence, StreamError> {
        let mut con = self.connection(RedisConnectionVariant::Multiplexed).await?;
        let items = [(STREAM_PAYLOAD_KEY, payload)];

        let id: String = match limit {
            Some(limit) => {
                con.xadd_maxlen(stream, StreamMaxlen::Approx(limit), STREAM_ID_NEW, &items)
                    .await
            }
            None => con.xadd(stream, STREAM_ID_NEW, &items).await,
        }
        .map_err(StreamError::unavailable)?;

        parse_sequence(&id)
    }

    async fn read_after(
        &self,
        stream: &str,
        after: Option<Sequence>,
        count: usize,
    ) -> Result<Vec<Record>, StreamError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut con = self.connection(RedisConnectionVariant::Multiplexed).await?;
        let reply: StreamRangeReply = con
            .xrange_count(stream, exclusive_start(after), STREAM_ID_MAX, count)
            .await
            .map_err(StreamError::unavailable)?;

        reply
            .ids
            .iter()
            .map(|entry| record_from_entry(stream, entry))
            .collect()
    }

    async fn read_sequences(
        &self,
        stream: &str,
        sequences: &[Sequence],
    ) -> Result<Vec<Record>, StreamError> {
        let mut con = self.connection(RedisConnectionVariant::Multiplexed).await?;
        let mut records = Vec::with_capacity(sequences.len());

        for sequence in sequences {
            let id = sequence.to_string();
            let reply: StreamRangeReply = con
                .xrange_count(stream, &id, &id, 1)
                .await
                .map_err(StreamError::unavailable)?;

            for entry in reply.ids.iter() {
                records.push(record_from_entry(stream, entry)?);
            }
        }

        Ok(records)
    }

    async fn last_sequence(&self, stream: &str) -> Result<Option<Sequence>, StreamError> {
        let mut con = self.connection(RedisConnectionVariant::Multiplexed).await?;
        let reply: StreamRangeReply = con
            .xrevrange_count(stream, STREAM_ID_MAX, STREAM_ID_MIN, 1)
            .await
            .map_err(StreamError::unavailable)?;

        reply
            .ids
            .first()
            .map(|entry| parse_sequence(&entry.id))
            .transpose()
    }

    async fn wait_for_append(
        &self,
        stream: &str,
        after: Option<Sequence>,
        timeout: Duration,
    ) -> Result<(), StreamError> {
        let block = match block_millis(Some(timeout)) {
            Some(block) => block,
            None => return Ok(()),
        };

        let id = after
            .map(|sequence| sequence.to_string())
            .unwrap_or_else(|| STREAM_ID_HEAD.to_string());
        let options = StreamReadOptions::default().count(1).block(block);

        // XREAD BLOCK occupies the whole connection
        let mut con = self.connection(RedisConnectionVariant::Owned).await?;
        let _: Option<StreamReadReply> = con
            .xread_options(&[stream], &[&id], &options)
            .await
            .map_err(StreamError::unavailable)?;

        Ok(())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn start_ranges_after_the_given_sequence() {
        assert_eq!(exclusive_start(None), "-");
        assert_eq!(exclusive_start(Some(Sequence::new(42, 0))), "42-1");
        assert_eq!(exclusive_start(Some(Sequence::new(42, 7))), "42-8");
    }

    #[test]
    fn carry_into_the_next_millisecond() {
        assert_eq!(exclusive_start(Some(Sequence::new(42, u64::MAX))), "43-0");
    }
}
