use super::{Record, Sequence};
use crate::library::communication::StreamError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Ordered, append-only store of [`Records`](Record) grouped into named streams
///
/// This is the narrow interface through which the engine talks to whatever durable log backs it.
/// Implementations are expected to assign strictly increasing [`Sequences`](Sequence) per stream and
/// never reuse them, even after records have been trimmed.
#[async_trait]
pub trait AppendLog {
    /// Appends a payload to the end of a stream, creating the stream if it does not exist.
    /// When a `limit` is given, the oldest records beyond it may be trimmed.
    async fn append(
        &self,
        stream: &str,
        payload: &[u8],
        limit: Option<usize>,
    ) -> Result<Sequence, StreamError>;

    /// Reads up to `count` records with a sequence strictly greater than `after` (or from the very start if `None`)
    async fn read_after(
        &self,
        stream: &str,
        after: Option<Sequence>,
        count: usize,
    ) -> Result<Vec<Record>, StreamError>;

    /// Looks up individual records, silently skipping those that no longer exist
    async fn read_sequences(
        &self,
        stream: &str,
        sequences: &[Sequence],
    ) -> Result<Vec<Record>, StreamError>;

    /// Sequence of the most recently appended record, if any
    async fn last_sequence(&self, stream: &str) -> Result<Option<Sequence>, StreamError>;

    /// Waits until a record newer than `after` has been appended or the timeout elapsed.
    /// Returning early is always permitted, callers have to re-check.
    async fn wait_for_append(
        &self,
        stream: &str,
        after: Option<Sequence>,
        timeout: Duration,
    ) -> Result<(), StreamError>;
}

#[async_trait]
impl<L> AppendLog for Arc<L>
where
    L: AppendLog + Send + Sync + ?Sized,
{
    async fn append(
        &self,
        stream: &str,
        payload: &[u8],
        limit: Option<usize>,
    ) -> Result<Sequence, StreamError> {
        (**self).append(stream, payload, limit).await
    }

    async fn read_after(
        &self,
        stream: &str,
        after: Option<Sequence>,
        count: usize,
    ) -> Result<Vec<Record>, StreamError> {
        (**self).read_after(stream, after, count).await
    }

    async fn read_sequences(
        &self,
        stream: &str,
        sequences: &[Sequence],
    ) -> Result<Vec<Record>, StreamError> {
        (**self).read_sequences(stream, sequences).await
    }

    async fn last_sequence(&self, stream: &str) -> Result<Option<Sequence>, StreamError> {
        (**self).last_sequence(stream).await
    }

    async fn wait_for_append(
        &self,
        stream: &str,
        after: Option<Sequence>,
        timeout: Duration,
    ) -> Result<(), StreamError> {
        (**self).wait_for_append(stream, after, timeout).await
    }
}
