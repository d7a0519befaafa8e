use crate::library::helpers::parse_seconds;
use crate::module::options::{QueueingOptions, RedisOptions};
use std::time::Duration;
use structopt::StructOpt;

/// Options for the storefront module
#[derive(Debug, StructOpt)]
pub struct Options {
    /// Number of consumer loops to run within this instance
    #[structopt(long, env, default_value = "1")]
    pub consumers: usize,

    /// Number of seconds product lookups stay cached, values of zero or below never expire
    #[structopt(long, env, default_value = "-1", allow_hyphen_values = true)]
    pub cache_ttl: i64,

    /// Number of seconds between two published orders and customer announcements
    #[structopt(long, env, default_value = "10", parse(try_from_str = parse_seconds))]
    pub publish_interval: Duration,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub queueing: QueueingOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub redis: RedisOptions,
}
