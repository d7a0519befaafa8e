use super::super::context::{SharedCoordinator, SharedLog};
use crate::domain::OrderPlacedNotification;
use crate::harness::TerminationSignal;
use crate::library::communication::event::{
    Consumer, ConsumerLoop, ConsumerOptions, LoopExit, Notification, NotificationHandler,
    NotificationPublisher, StreamPublisher,
};
use crate::library::EmptyResult;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Periodically places a new order
pub struct OrderPublisherJob {
    publisher: StreamPublisher<SharedLog>,
    interval: Duration,
}

impl OrderPublisherJob {
    /// Creates a new job publishing to the given log
    pub fn new(log: SharedLog, interval: Duration) -> Self {
        Self {
            publisher: StreamPublisher::new(log),
            interval,
        }
    }

    /// Publishes orders until termination is requested
    ///
    /// Orders that fail to publish are dropped, the next tick tries again with a new one.
    pub async fn run(self, mut termination: TerminationSignal) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.publish().await,
                _ = termination.triggered() => break,
            }
        }
    }

    async fn publish(&self) {
        let order = OrderPlacedNotification::default();

        match self.publisher.publish_notification(&order).await {
            Ok(sequence) => debug!(id = %order.id, %sequence, "Published order"),
            Err(error) => warn!(?error, "Failed to publish order"),
        }
    }
}

/// Logs every received order
#[derive(Default)]
pub struct OrderListener;

#[async_trait]
impl Consumer for OrderListener {
    type Notification = OrderPlacedNotification;

    async fn consume(&self, notification: Self::Notification) -> EmptyResult {
        info!(id = %notification.id, amount = notification.amount, "Received order");
        Ok(())
    }
}

/// Consumes the order stream as one member of a consumer group
pub struct OrderConsumerJob {
    consumer_loop: ConsumerLoop<SharedCoordinator, NotificationHandler<OrderListener>>,
}

impl OrderConsumerJob {
    /// Creates a new job with the given consumer identity
    pub fn new(coordinator: SharedCoordinator, options: ConsumerOptions) -> Self {
        let stream = OrderPlacedNotification::stream();
        let handler = NotificationHandler::new(OrderListener);

        Self {
            consumer_loop: ConsumerLoop::new(coordinator, stream.key(), handler, options),
        }
    }

    /// Consumes orders until termination is requested or an error cancels the loop
    pub async fn run(self, termination: TerminationSignal) {
        if let LoopExit::Cancelled(error) = self.consumer_loop.run(termination.receiver()).await {
            warn!(?error, "Order consumer gave up");
        }
    }
}
