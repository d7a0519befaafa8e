//! Structures to move messages between services
//!
//! There are two modes of operation:
//!
//! 1. Durable streams consumed by consumer groups
//! 2. Ephemeral broadcasts
//!
//! The first is used for work that may not get lost. Records are appended to a log-like
//! stream and handed out to the members of a [consumer group](event::ConsumerGroupDescriptor).
//! Each record is delivered to exactly one consumer within a group and stays pending until it
//! has been acknowledged. Pending records of crashed consumers are reclaimed by their peers,
//! which gives at-least-once delivery. For more details, consult the [`event`] module.
//!
//! The second mode is plain publish and subscribe. A message sent to a [topic](broadcast::BroadcastChannel)
//! reaches every listener that is subscribed at that very moment and is gone afterwards.
//! There is no backlog, no replay and no acknowledgement.

mod error;

pub mod broadcast;
pub mod event;
pub mod implementation;

pub use error::StreamError;
