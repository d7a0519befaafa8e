use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use thiserror::Error;

/// Position of a [`Record`] within its stream
///
/// Sequences are composed of two parts, `major-minor`, which mirrors the entry id format of
/// [Redis Streams](https://redis.io/topics/streams-intro) (`<milliseconds>-<counter>`).
/// They are ordered by `major` first and `minor` second and are never reused within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sequence {
    major: u64,
    minor: u64,
}

impl Sequence {
    /// Smallest possible sequence, everything appended to a stream is greater than this
    pub const MIN: Sequence = Sequence { major: 0, minor: 0 };

    /// Creates a new instance from raw parts
    pub const fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }

    /// Primary ordering component
    pub fn major(&self) -> u64 {
        self.major
    }

    /// Secondary ordering component
    pub fn minor(&self) -> u64 {
        self.minor
    }

    /// Next sequence in a gapless series (`major + 1`, `minor` reset to zero)
    pub fn successor(&self) -> Self {
        Self {
            major: self.major + 1,
            minor: 0,
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.major, self.minor)
    }
}

/// Error returned when parsing a malformed [`Sequence`]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SequenceParseError {
    /// One of the components is not an unsigned integer
    #[error("invalid sequence component: {0}")]
    InvalidComponent(#[from] ParseIntError),
    /// String contains more than two components
    #[error("sequence has too many components")]
    TooManyComponents,
}

impl FromStr for Sequence {
    type Err = SequenceParseError;

    /// Accepts both `major-minor` and a bare `major` (implying a minor of zero)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');

        let major = parts.next().unwrap_or_default().parse::<u64>()?;
        let minor = match parts.next() {
            Some(minor) => minor.parse::<u64>()?,
            None => 0,
        };

        if parts.next().is_some() {
            return Err(SequenceParseError::TooManyComponents);
        }

        Ok(Self { major, minor })
    }
}

/// Immutable entry of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    stream: String,
    sequence: Sequence,
    payload: Vec<u8>,
}

impl Record {
    /// Creates a new instance from raw parts
    pub fn new(stream: impl Into<String>, sequence: Sequence, payload: Vec<u8>) -> Self {
        Self {
            stream: stream.into(),
            sequence,
            payload,
        }
    }

    /// Key of the stream this record belongs to
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Position within the stream
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Opaque payload as it was appended
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
