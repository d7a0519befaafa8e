use crate::library::BoxedError;
use thiserror::Error;

/// Failures surfaced by stream stores and consumer group coordinators
#[derive(Error, Debug)]
pub enum StreamError {
    /// Strict group creation raced with or followed an earlier creation
    #[error("consumer group {group} already exists on stream {stream}")]
    AlreadyExists {
        /// Key of the stream
        stream: String,
        /// Name of the consumer group
        group: String,
    },
    /// Operation referenced a consumer group that has never been created
    #[error("consumer group {group} does not exist on stream {stream}")]
    UnknownGroup {
        /// Key of the stream
        stream: String,
        /// Name of the consumer group
        group: String,
    },
    /// Backing store could not be reached or refused the operation
    #[error("stream store unavailable")]
    StoreUnavailable(#[source] BoxedError),
}

impl StreamError {
    /// Wraps an arbitrary error as [`StreamError::StoreUnavailable`]
    pub fn unavailable<E: Into<BoxedError>>(error: E) -> Self {
        Self::StoreUnavailable(error.into())
    }

    /// Whether the error indicates a transport problem rather than a logical one
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use std::error::Error;

    #[test]
    fn retain_source_of_unavailability() {
        let error = StreamError::unavailable("connection refused");

        assert!(error.is_unavailable());
        assert_eq!(error.to_string(), "stream store unavailable");
        assert_eq!(error.source().unwrap().to_string(), "connection refused");
    }

    #[test]
    fn name_group_and_stream() {
        let error = StreamError::AlreadyExists {
            stream: "orders".into(),
            group: "my-group".into(),
        };

        assert!(!error.is_unavailable());
        assert_eq!(
            error.to_string(),
            "consumer group my-group already exists on stream orders"
        );
    }
}
