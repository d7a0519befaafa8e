//! Demo storefront wiring streams, broadcasts and caches together
//!
//! Orders are published to the `orders` stream on a timer and consumed by one or more consumer loops
//! sharing a consumer group. Customer announcements are broadcast on the `customers` topic and
//! logged by a local listener. Product lookups go through a cache named `products`.

mod context;
mod options;
mod services;

use crate::domain::{Product, CUSTOMER_TOPIC};
use crate::harness::{Heart, JobSet, Module};
use crate::library::cache::Ttl;
use crate::library::communication::broadcast::Subscription;
use crate::library::BoxedError;
use async_trait::async_trait;
use tracing::info;

pub use context::*;
pub use options::Options;
pub use services::*;

/// Module implementation
pub struct Storefront {
    options: Options,
    subscriptions: Vec<Subscription>,
}

impl Storefront {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self {
            options,
            subscriptions: Vec::new(),
        }
    }

    fn context(&self) -> Result<Context, BoxedError> {
        match &self.options.redis.url {
            Some(url) => Context::redis(url, vec![CUSTOMER_TOPIC.to_owned()]),
            None => Ok(Context::in_memory()),
        }
    }

    fn consumer_identifiers(&self) -> Vec<String> {
        let consumer = &self.options.queueing.consumer;

        match self.options.consumers {
            0 | 1 => vec![consumer.clone()],
            count => (1..=count)
                .map(|index| format!("{}-{}", consumer, index))
                .collect(),
        }
    }
}

#[async_trait]
impl Module for Storefront {
    async fn run(&mut self, jobs: &JobSet) -> Result<Option<Heart>, BoxedError> {
        let context = self.context()?;
        let interval = self.options.publish_interval;

        // Broadcasts
        self.subscriptions
            .push(context.channel.subscribe(CUSTOMER_TOPIC, CustomerListener));

        if let Some(relay) = context.relay() {
            jobs.spawn("broadcast-relay", |mut termination| async move {
                tokio::select! {
                    _ = relay.relay_forever() => {},
                    _ = termination.triggered() => {},
                }
            })
            .await;
        }

        let customer_publisher = CustomerPublisherJob::new(context.broadcast.clone(), interval);
        jobs.spawn("customer-publisher", |termination| {
            customer_publisher.run(termination)
        })
        .await;

        // Streams
        for consumer in self.consumer_identifiers() {
            let options = self.options.queueing.consumer_options(consumer.clone());
            let job = OrderConsumerJob::new(context.coordinator.clone(), options);
            jobs.spawn(&consumer, |termination| job.run(termination))
                .await;
        }

        let order_publisher = OrderPublisherJob::new(context.log.clone(), interval);
        jobs.spawn("order-publisher", |termination| order_publisher.run(termination))
            .await;

        // Cache
        let products = ProductService::new(
            context.cache.clone(),
            Ttl::from_seconds(self.options.cache_ttl),
        );

        products
            .save(Product::new("1", "Coffee mug").with_price(1000))
            .await?;

        for id in ["1", "2", "2"] {
            let product = products.get_product(id).await?;
            info!(?product, "Looked up product");
        }

        let (heart, _) = Heart::new();
        Ok(Some(heart))
    }

    async fn pre_shutdown(&mut self) {
        self.subscriptions.clear();
    }
}
