//! Structures to realise durable, consumer-group based streaming
//!
//! Services append [`Records`](Record) to named streams. The stream is a log-like data
//! structure (usually of limited length where old records are evicted), backed by an [`AppendLog`].
//!
//! Consumers never read from the log directly. Instead they join a [consumer group](ConsumerGroupDescriptor)
//! and ask its [`GroupCoordinator`] for work. The coordinator hands out every record only once per group,
//! which effectively implements load balancing and simple, dynamic scalability between the consumers of a group.
//! Every delivered record stays pending until it has been acknowledged. If a consumer crashes, its pending
//! records are reclaimed by a peer once they have been idle for long enough. This ensures that no record is left
//! unprocessed at the cost of occasional duplicate processing, thus handlers should be idempotent.
//!
//! The [`ConsumerLoop`] drives this cycle for one consumer and dispatches records to a [`RecordHandler`].
//! Typed payloads are supported through the [`Notification`] trait which binds a serializable type to its stream.

mod consumer;
mod consumer_group;
mod consumer_loop;
mod coordinator;
mod log;
mod notification;
mod publisher;
mod queue;
mod record;

pub use self::log::*;
pub use consumer::*;
pub use consumer_group::*;
pub use consumer_loop::*;
pub use coordinator::*;
pub use notification::*;
pub use publisher::*;
pub use queue::*;
pub use record::*;
