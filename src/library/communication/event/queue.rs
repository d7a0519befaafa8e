/// Describes a stream and its retention parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    key: String,
    limit: Option<usize>,
}

impl StreamDescriptor {
    /// Creates a new instance from raw parts. A limit of zero is raised to one record.
    pub fn new(key: impl Into<String>, limit: Option<usize>) -> Self {
        Self {
            key: key.into(),
            limit: limit.map(|limit| limit.max(1)),
        }
    }

    /// Creates a descriptor for a stream that is never trimmed
    pub fn unbounded(key: impl Into<String>) -> Self {
        Self::new(key, None)
    }

    /// Value which is used by stores to identify a stream
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Approximate maximum number of records to be retained in the stream
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

/// Location within a stream from which a newly created consumer group starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    /// Start of the stream (not necessarily the first record ever appended as a stream may be trimmed)
    Head,
    /// End of the stream (exclusive of the last record)
    Tail,
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn retain_at_least_one_record() {
        assert_eq!(StreamDescriptor::new("orders", Some(0)).limit(), Some(1));
        assert_eq!(StreamDescriptor::new("orders", Some(25)).limit(), Some(25));
        assert_eq!(StreamDescriptor::unbounded("orders").limit(), None);
    }
}
