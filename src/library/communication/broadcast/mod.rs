//! Ephemeral fan-out of messages to listeners of a topic
//!
//! Unlike the [`event`](super::event) streams, broadcast messages are neither persisted nor acknowledged.
//! A message is handed to every listener subscribed to its topic at the time of publishing and then forgotten.
//! Listeners registered afterwards never see it and a topic without listeners silently drops it.

use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{trace, warn};

/// Payload sent to a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: Arc<str>,
    payload: Arc<[u8]>,
}

impl Message {
    /// Creates a new message for a topic
    pub fn new(topic: &str, payload: &[u8]) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Topic the message was published on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Raw payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload interpreted as UTF-8, replacing invalid sequences
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Fire-and-forget listener of a broadcast topic
///
/// Errors are logged and counted by the publisher but have no further consequences.
#[async_trait]
pub trait MessageHandler {
    /// Handles a single message
    async fn on_message(&self, message: Message) -> EmptyResult;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = EmptyResult> + Send,
{
    async fn on_message(&self, message: Message) -> EmptyResult {
        (self)(message).await
    }
}

/// Entity which sends messages to the listeners of a topic
///
/// Local channels deliver in-process while other implementations may reach listeners in different processes.
#[async_trait]
pub trait BroadcastPublisher {
    /// Sends a message and returns the number of listeners it reached
    async fn broadcast(&self, topic: &str, payload: &[u8]) -> Result<usize, BoxedError>;
}

/// Outcome of a single [`publish`](BroadcastChannel::publish) call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Listeners that handled the message successfully
    pub delivered: usize,
    /// Listeners that returned an error or panicked
    pub failed: usize,
}

impl DeliveryReport {
    /// Total number of listeners the message was handed to
    pub fn listeners(&self) -> usize {
        self.delivered + self.failed
    }
}

type BoxedMessageHandler = Arc<dyn MessageHandler + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    topics: Mutex<HashMap<String, Vec<(u64, BoxedMessageHandler)>>>,
}

impl Registry {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, Vec<(u64, BoxedMessageHandler)>>> {
        // Listeners never run under the lock, a poisoned map is still consistent
        self.topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, topic: &str, id: u64) {
        let mut topics = self.topics();

        if let Some(listeners) = topics.get_mut(topic) {
            listeners.retain(|(listener_id, _)| *listener_id != id);

            if listeners.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

/// In-process registry of topic listeners
///
/// Clones share the same set of subscriptions.
#[derive(Clone, Default)]
pub struct BroadcastChannel {
    registry: Arc<Registry>,
}

impl BroadcastChannel {
    /// Creates a channel without any subscriptions
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for a topic
    ///
    /// The listener stays registered until the returned [`Subscription`] is dropped.
    pub fn subscribe<H>(&self, topic: &str, handler: H) -> Subscription
    where
        H: MessageHandler + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);

        self.registry
            .topics()
            .entry(topic.to_owned())
            .or_default()
            .push((id, Arc::new(handler)));

        trace!(topic, id, "Listener subscribed");

        Subscription {
            topic: topic.to_owned(),
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Hands a message to every listener currently subscribed to the topic
    ///
    /// Listeners run concurrently. A failing listener neither affects the others nor the caller.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> DeliveryReport {
        let listeners: Vec<BoxedMessageHandler> = match self.registry.topics().get(topic) {
            Some(listeners) => listeners.iter().map(|(_, h)| h.clone()).collect(),
            None => Vec::new(),
        };

        if listeners.is_empty() {
            trace!(topic, "Dropping message without listeners");
            return DeliveryReport::default();
        }

        let message = Message::new(topic, payload);
        let deliveries = listeners.iter().map(|listener| {
            AssertUnwindSafe(listener.on_message(message.clone())).catch_unwind()
        });

        let mut report = DeliveryReport::default();

        for outcome in join_all(deliveries).await {
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(error)) => {
                    warn!(topic, ?error, "Listener failed to handle message");
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(topic, "Listener panicked while handling message");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Number of listeners currently subscribed to a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry
            .topics()
            .get(topic)
            .map(Vec::len)
            .unwrap_or_default()
    }

    /// Topics with at least one listener
    pub fn topics(&self) -> Vec<String> {
        self.registry.topics().keys().cloned().collect()
    }
}

#[async_trait]
impl BroadcastPublisher for BroadcastChannel {
    async fn broadcast(&self, topic: &str, payload: &[u8]) -> Result<usize, BoxedError> {
        Ok(self.publish(topic, payload).await.listeners())
    }
}

/// Handle of a registered listener, unsubscribes when dropped
#[must_use = "dropping a subscription immediately unsubscribes the listener"]
pub struct Subscription {
    topic: String,
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Topic the listener is subscribed to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Removes the listener
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.topic, self.id);
            trace!(topic = %self.topic, id = self.id, "Listener unsubscribed");
        }
    }
}
