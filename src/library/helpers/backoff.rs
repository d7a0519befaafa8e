//! Exponential backoff implementations

use std::{iter::Iterator, time::Duration};

/// Exponential backoff iterator
///
/// Yields monotonically increasing durations, each one being the previous one multiplied by `multiplier`,
/// until the `ceiling` is reached. From then on the ceiling is repeated. When a `limit` is set, the iterator
/// ends after that many elements. Call [`reset`](Backoff::reset) after a successful attempt to start over.
#[derive(Debug, Clone)]
pub struct Backoff {
    retries: u32,
    limit: Option<u32>,
    multiplier: u32,
    initial: Duration,
    current: Duration,
    ceiling: Duration,
}

impl Backoff {
    /// Creates an unlimited backoff starting at `initial` and never exceeding `ceiling`
    pub fn capped(initial: Duration, ceiling: Duration) -> Self {
        Self {
            retries: 0,
            limit: None,
            multiplier: 2,
            initial,
            current: initial,
            ceiling,
        }
    }

    /// Limits the number of elements yielded before the iterator ends
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Starts over from the initial duration
    pub fn reset(&mut self) {
        self.retries = 0;
        self.current = self.initial;
    }

    /// Number of elements yielded since the last reset
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::capped(Duration::from_millis(25), Duration::from_secs(5))
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(limit) = self.limit {
            if self.retries >= limit {
                return None;
            }
        }

        let value = self.current;
        self.retries += 1;
        self.current = (self.current * self.multiplier).min(self.ceiling);

        Some(value)
    }
}
