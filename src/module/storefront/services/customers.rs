use super::super::context::SharedBroadcastPublisher;
use crate::domain::{customer_announcement, CUSTOMER_TOPIC};
use crate::harness::TerminationSignal;
use crate::library::communication::broadcast::{Message, MessageHandler};
use crate::library::EmptyResult;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, trace, warn};

/// Periodically announces a new customer to everyone listening
pub struct CustomerPublisherJob {
    publisher: SharedBroadcastPublisher,
    interval: Duration,
}

impl CustomerPublisherJob {
    /// Creates a new job broadcasting through the given publisher
    pub fn new(publisher: SharedBroadcastPublisher, interval: Duration) -> Self {
        Self {
            publisher,
            interval,
        }
    }

    /// Announces customers until termination is requested
    pub async fn run(self, mut termination: TerminationSignal) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.announce().await,
                _ = termination.triggered() => break,
            }
        }
    }

    async fn announce(&self) {
        let announcement = customer_announcement();

        match self
            .publisher
            .broadcast(CUSTOMER_TOPIC, announcement.as_bytes())
            .await
        {
            Ok(listeners) => trace!(listeners, "Announced customer"),
            Err(error) => warn!(?error, "Failed to announce customer"),
        }
    }
}

/// Logs every customer announcement
#[derive(Default)]
pub struct CustomerListener;

#[async_trait]
impl MessageHandler for CustomerListener {
    async fn on_message(&self, message: Message) -> EmptyResult {
        info!(message = %message.payload_text(), "Received message");
        Ok(())
    }
}
