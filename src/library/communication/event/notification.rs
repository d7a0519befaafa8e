use super::StreamDescriptor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Entity to notify other services about an event that took place
pub trait Notification: Serialize + DeserializeOwned + Debug {
    /// Stream on which this implementation is sent and received
    fn stream() -> StreamDescriptor;
}
