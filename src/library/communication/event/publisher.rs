use super::{AppendLog, Notification, Sequence, StreamDescriptor};
use crate::library::communication::StreamError;
use crate::library::BoxedError;
use async_trait::async_trait;
use tracing::trace;

/// Structure which allows appending serialized data to a stream
#[async_trait]
pub trait RawRecordPublisher {
    /// Appends an opaque payload to the stream described by `descriptor`, honoring its retention limit
    async fn publish_raw(
        &self,
        data: &[u8],
        descriptor: &StreamDescriptor,
    ) -> Result<Sequence, StreamError>;
}

/// Publisher for [`Notifications`](Notification)
#[async_trait]
pub trait NotificationPublisher {
    /// Publishes a [`Notification`] to its designated stream
    async fn publish_notification<N: Notification + Send + Sync>(
        &self,
        notification: &N,
    ) -> Result<Sequence, BoxedError>;
}

/// Appends records to streams of an [`AppendLog`]
///
/// Failures of the log, most notably [`StreamError::StoreUnavailable`], are handed to the caller as-is.
/// Retrying is up to whoever calls [`publish`](StreamPublisher::publish), usually a timer.
#[derive(Clone)]
pub struct StreamPublisher<L> {
    log: L,
}

impl<L> StreamPublisher<L>
where
    L: AppendLog + Send + Sync,
{
    /// Creates a new instance on top of a given log
    pub fn new(log: L) -> Self {
        Self { log }
    }

    /// Appends a payload to an unbounded stream and returns its assigned sequence
    pub async fn publish(&self, stream: &str, payload: &[u8]) -> Result<Sequence, StreamError> {
        let sequence = self.log.append(stream, payload, None).await?;
        trace!(stream, %sequence, "Published record");
        Ok(sequence)
    }

    /// Appends a payload to a stream, trimming it to the limit of the descriptor
    pub async fn publish_to(
        &self,
        descriptor: &StreamDescriptor,
        payload: &[u8],
    ) -> Result<Sequence, StreamError> {
        let sequence = self
            .log
            .append(descriptor.key(), payload, descriptor.limit())
            .await?;
        trace!(stream = descriptor.key(), %sequence, "Published record");
        Ok(sequence)
    }
}

#[async_trait]
impl<L> RawRecordPublisher for StreamPublisher<L>
where
    L: AppendLog + Send + Sync,
{
    async fn publish_raw(
        &self,
        data: &[u8],
        descriptor: &StreamDescriptor,
    ) -> Result<Sequence, StreamError> {
        self.publish_to(descriptor, data).await
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::implementation::memory::MemoryLog;
    use std::sync::Arc;

    #[tokio::test]
    async fn return_strictly_increasing_sequences() {
        let publisher = StreamPublisher::new(MemoryLog::default());
        let mut previous: Option<Sequence> = None;

        for i in 0..50u32 {
            let sequence = publisher
                .publish("orders", &i.to_be_bytes())
                .await
                .unwrap();

            if let Some(previous) = previous {
                assert!(previous < sequence);
                assert_eq!(previous.successor(), sequence);
            }

            previous = Some(sequence);
        }
    }

    #[tokio::test]
    async fn surface_unavailable_store_without_retrying() {
        let log = Arc::new(MemoryLog::default());
        let publisher = StreamPublisher::new(log.clone());
        log.set_offline(true);

        let result = publisher.publish("orders", b"lost").await;
        assert!(matches!(result, Err(StreamError::StoreUnavailable(_))));

        log.set_offline(false);
        assert_eq!(log.len("orders").await, 0);
    }

    #[tokio::test]
    async fn trim_to_descriptor_limit() {
        let log = Arc::new(MemoryLog::default());
        let publisher = StreamPublisher::new(log.clone());
        let descriptor = StreamDescriptor::new("orders", Some(3));

        for _ in 0..10 {
            publisher.publish_raw(b"x", &descriptor).await.unwrap();
        }

        assert_eq!(log.len("orders").await, 3);
    }
}
