use super::StartOffset;

/// Definition of a consumer group
///
/// In a stream, a group of consumers collaborates to consume records.
/// Each record is only delivered to one consumer within the same group, identified
/// by its name. When it is created, the group starts processing records
/// from the provided [`StartOffset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerGroupDescriptor {
    name: String,
    start: StartOffset,
}

impl ConsumerGroupDescriptor {
    /// Creates a new instance from raw parts
    pub fn new(name: impl Into<String>, start: StartOffset) -> Self {
        Self {
            name: name.into(),
            start,
        }
    }

    /// Unique name of the group
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Location from where a consumer group begins to consume records
    ///
    /// Note that this is not honored when the group already exists!
    pub fn start(&self) -> StartOffset {
        self.start
    }
}

impl Default for ConsumerGroupDescriptor {
    /// Uses a group called `worker` starting at [`StartOffset::Head`] as it is most commonly employed
    fn default() -> Self {
        Self {
            name: "worker".into(),
            start: StartOffset::Head,
        }
    }
}

/// Unique identifier of a consumer within a [`ConsumerGroup`](ConsumerGroupDescriptor)
pub type ConsumerIdentifier = String;
