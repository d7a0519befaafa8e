use std::time::Duration;

/// Lifetime of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Entry stays until it is overwritten or evicted
    Never,
    /// Entry becomes unreadable once the duration has passed since the write
    After(Duration),
}

impl Ttl {
    /// Converts a number of seconds where anything below one, including the customary `-1`, never expires
    pub fn from_seconds(seconds: i64) -> Self {
        if seconds <= 0 {
            Self::Never
        } else {
            Self::After(Duration::from_secs(seconds as u64))
        }
    }

    /// Duration after which the entry expires, if any
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::After(duration) => Some(*duration),
        }
    }
}

impl Default for Ttl {
    fn default() -> Self {
        Self::Never
    }
}

impl From<Option<Duration>> for Ttl {
    fn from(duration: Option<Duration>) -> Self {
        duration.map(Self::After).unwrap_or(Self::Never)
    }
}
