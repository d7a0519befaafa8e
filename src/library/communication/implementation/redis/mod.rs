//! Trait implementations using [`redis`](::redis)
//!
//! Streams are mapped onto [Redis Streams](https://redis.io/topics/streams-intro) and their consumer groups,
//! broadcasts onto [Pub/Sub](https://redis.io/topics/pubsub). Every stream entry carries its payload in a
//! single field named `payload`.

const STREAM_PAYLOAD_KEY: &str = "payload";
const STREAM_ID_NEW: &str = "*";
const STREAM_ID_HEAD: &str = "0";
const STREAM_ID_TAIL: &str = "$";
const STREAM_ID_ADDITIONS: &str = ">";
const STREAM_ID_MIN: &str = "-";
const STREAM_ID_MAX: &str = "+";

mod broadcast;
mod coordinator;
mod factory;
mod log;

pub use self::log::*;
pub use broadcast::*;
pub use coordinator::*;
pub use factory::*;

use super::super::event::{Record, Sequence};
use super::super::StreamError;
use redis::streams::StreamId;
use redis::RedisError;
use std::time::Duration;
use tracing::warn;

/// Translates errors returned by stream commands into their logical counterpart where possible
fn stream_error(error: RedisError, stream: &str, group: &str) -> StreamError {
    match error.code() {
        Some("BUSYGROUP") => StreamError::AlreadyExists {
            stream: stream.to_owned(),
            group: group.to_owned(),
        },
        Some("NOGROUP") => StreamError::UnknownGroup {
            stream: stream.to_owned(),
            group: group.to_owned(),
        },
        _ => StreamError::unavailable(error),
    }
}

fn parse_sequence(id: &str) -> Result<Sequence, StreamError> {
    id.parse::<Sequence>().map_err(StreamError::unavailable)
}

fn record_from_entry(stream: &str, entry: &StreamId) -> Result<Record, StreamError> {
    let sequence = parse_sequence(&entry.id)?;
    let payload = entry.get::<Vec<u8>>(STREAM_PAYLOAD_KEY).unwrap_or_else(|| {
        warn!(stream, %sequence, "Stream entry without payload field");
        Vec::new()
    });

    Ok(Record::new(stream, sequence, payload))
}

/// Milliseconds for commands that block, `None` if the command should return immediately.
/// Redis treats a zero timeout as "block forever" which is never what we want.
fn block_millis(duration: Option<Duration>) -> Option<usize> {
    duration
        .filter(|duration| !duration.is_zero())
        .map(|duration| duration.as_millis().max(1) as usize)
}
