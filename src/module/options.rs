//! Various options usable by modules
//!
//! The structs in this module allow other modules to flatten them into
//! their own options struct. This allows for a unified yet non-cluttered
//! option set.

use std::time::Duration;

use crate::library::communication::event::{
    ConsumerGroupDescriptor, ConsumerOptions, LoopError, StartOffset,
};
use crate::library::helpers::parse_seconds;
use structopt::StructOpt;

/// Options for connecting to the Redis server
#[derive(Debug, StructOpt)]
pub struct RedisOptions {
    /// Redis database server URL
    ///
    /// Omitting it keeps all streams, broadcasts and caches in memory
    #[structopt(short = "r", long = "redis", env = "REDIS", value_name = "url")]
    pub url: Option<String>,
}

/// Options relevant for consuming streams
#[derive(Debug, StructOpt)]
pub struct QueueingOptions {
    /// Name of the consumer group shared by all instances
    #[structopt(long, env, default_value = "my-group")]
    pub group: String,

    /// Stable identifier of this consumer within the group.
    /// It is used to resume pending work after a crash
    /// or deliberate restart, thus it should not change across
    /// executions!
    #[structopt(long, env, default_value = "consumer-1")]
    pub consumer: String,

    /// Number of seconds a single poll blocks waiting for new records
    #[structopt(long, env, default_value = "5", parse(try_from_str = parse_seconds))]
    pub poll_timeout: Duration,

    /// Acknowledge records regardless of whether their handler succeeded
    #[structopt(long, env, default_value = "false", parse(try_from_str))]
    pub auto_acknowledge: bool,

    /// Stop consuming as soon as a handler fails
    #[structopt(long, env, default_value = "false", parse(try_from_str))]
    pub cancel_on_error: bool,

    /// Number of seconds after which a pending record is considered abandoned
    #[structopt(long, env, default_value = "60", parse(try_from_str = parse_seconds))]
    pub idle_threshold: Duration,

    /// Number of seconds between scans for abandoned records
    #[structopt(long, env, default_value = "30", parse(try_from_str = parse_seconds))]
    pub reclaim_interval: Duration,
}

impl QueueingOptions {
    /// Builds the loop configuration for a consumer with the given identifier
    pub fn consumer_options(&self, consumer: impl Into<String>) -> ConsumerOptions {
        let group = ConsumerGroupDescriptor::new(self.group.clone(), StartOffset::Head);

        let options = ConsumerOptions::new(group, consumer)
            .with_poll_timeout(self.poll_timeout)
            .with_auto_acknowledge(self.auto_acknowledge)
            .with_reclaim(self.reclaim_interval, self.idle_threshold);

        if self.cancel_on_error {
            options.cancel_on_error(|error| matches!(error, LoopError::Handler { .. }))
        } else {
            options
        }
    }
}
