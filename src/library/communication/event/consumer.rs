use super::{Notification, Record};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::any::type_name;
use std::future::Future;
use tracing::trace;

/// Raw access to the serialized content of a stream entry
pub trait RawPayload {
    /// Unparsed payload bytes
    fn raw_payload(&self) -> &[u8];
}

/// Stream entry which can be deserialized into a strongly typed structure
pub trait PayloadParser {
    /// Parses the payload into a given type
    fn parse_payload<'a, T>(&'a self) -> Result<T, BoxedError>
    where
        T: Deserialize<'a>;
}

impl RawPayload for Record {
    fn raw_payload(&self) -> &[u8] {
        self.payload()
    }
}

/// Processes raw [`Records`](Record) delivered by a [`ConsumerLoop`](super::ConsumerLoop)
///
/// Returning an error leaves the record pending (unless auto-acknowledgement is enabled)
/// so that it will eventually be redelivered. Implementations should thus be idempotent.
#[async_trait]
pub trait RecordHandler {
    /// Handles a single record
    async fn handle(&self, record: Record) -> EmptyResult;
}

#[async_trait]
impl<F, Fut> RecordHandler for F
where
    F: Fn(Record) -> Fut + Send + Sync,
    Fut: Future<Output = EmptyResult> + Send,
{
    async fn handle(&self, record: Record) -> EmptyResult {
        (self)(record).await
    }
}

/// Entity which may consume and process [`Notifications`](Notification)
#[async_trait]
pub trait Consumer {
    /// Notification to consume
    type Notification: Notification;

    /// Processes an event notification and returns whether it succeeded or failed
    async fn consume(&self, notification: Self::Notification) -> EmptyResult;
}

/// Adapter which turns a typed [`Consumer`] into a [`RecordHandler`]
///
/// Records that can not be deserialized are reported as handler failures.
pub struct NotificationHandler<C> {
    consumer: C,
}

impl<C> NotificationHandler<C> {
    /// Wraps a consumer
    pub fn new(consumer: C) -> Self {
        Self { consumer }
    }

    /// Underlying consumer
    pub fn consumer(&self) -> &C {
        &self.consumer
    }
}

#[async_trait]
impl<C> RecordHandler for NotificationHandler<C>
where
    C: Consumer + Send + Sync,
    C::Notification: Send,
{
    async fn handle(&self, record: Record) -> EmptyResult {
        let notification = record.parse_payload::<C::Notification>()?;
        trace!(
            sequence = %record.sequence(),
            notification = type_name::<C::Notification>(),
            "Dispatching notification"
        );
        self.consumer.consume(notification).await
    }
}
