//! Serialization and deserialization provided by [`serde_json`] using marker traits
//!
//! Implementors of the raw, byte-oriented traits gain the strongly typed counterparts by implementing
//! one of the marker traits below. Exchanging the serialization format only requires changing the markers.

use super::super::event::{
    Notification, NotificationPublisher, PayloadParser, RawPayload, RawRecordPublisher, Record,
    Sequence, StreamPublisher,
};
use crate::library::communication::event::AppendLog;
use crate::library::BoxedError;
use async_trait::async_trait;
use serde::Deserialize;

/// Marker trait providing a default [`NotificationPublisher`] implementation based on [`serde_json`]
pub trait JsonNotificationPublisher: RawRecordPublisher + Send + Sync {}

#[async_trait]
impl<P> NotificationPublisher for P
where
    P: JsonNotificationPublisher,
{
    /// Serializes the notification using [`serde_json::to_vec`]
    async fn publish_notification<N: Notification + Send + Sync>(
        &self,
        notification: &N,
    ) -> Result<Sequence, BoxedError> {
        let data = serde_json::to_vec(notification)?;
        let sequence = self.publish_raw(&data, &N::stream()).await?;
        Ok(sequence)
    }
}

/// Marker trait providing a default [`PayloadParser`] implementation based on [`serde_json`]
pub trait JsonPayload: RawPayload {}

impl<E> PayloadParser for E
where
    E: JsonPayload,
{
    /// Parses the payload using [`serde_json::from_slice`]
    fn parse_payload<'a, T>(&'a self) -> Result<T, BoxedError>
    where
        T: Deserialize<'a>,
    {
        serde_json::from_slice(self.raw_payload()).map_err(Into::into)
    }
}

impl JsonPayload for Record {}
impl<L> JsonNotificationPublisher for StreamPublisher<L> where L: AppendLog + Send + Sync {}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::event::{
        Consumer, GroupCoordinator, LogCoordinator, NotificationHandler, RecordHandler,
        StartOffset, StreamDescriptor,
    };
    use crate::library::communication::implementation::memory::MemoryLog;
    use crate::library::EmptyResult;
    use pretty_assertions::assert_eq;
    use serde::Serialize;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        text: String,
    }

    impl Notification for Greeting {
        fn stream() -> StreamDescriptor {
            StreamDescriptor::new("greetings", Some(100))
        }
    }

    #[derive(Default)]
    struct Collector {
        received: Mutex<Vec<Greeting>>,
    }

    #[async_trait]
    impl Consumer for Collector {
        type Notification = Greeting;

        async fn consume(&self, notification: Greeting) -> EmptyResult {
            self.received.lock().await.push(notification);
            Ok(())
        }
    }

    #[tokio::test]
    async fn round_trip_notifications() {
        let log = Arc::new(MemoryLog::default());
        let publisher = StreamPublisher::new(log.clone());
        let coordinator = LogCoordinator::new(log.clone());
        let greeting = Greeting {
            text: "hello".into(),
        };

        coordinator
            .create_group("greetings", "readers", StartOffset::Head)
            .await
            .unwrap();
        publisher.publish_notification(&greeting).await.unwrap();

        let records = coordinator
            .claim_next("greetings", "readers", "reader-1", 10, None)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);

        let handler = NotificationHandler::new(Collector::default());
        for record in records {
            handler.handle(record).await.unwrap();
        }

        assert_eq!(*handler.consumer().received.lock().await, vec![greeting]);
    }

    #[tokio::test]
    async fn reject_malformed_payloads() {
        let handler = NotificationHandler::new(Collector::default());
        let record = Record::new("greetings", Sequence::new(1, 0), b"not json".to_vec());

        assert!(handler.handle(record).await.is_err());
        assert!(handler.consumer().received.lock().await.is_empty());
    }
}
