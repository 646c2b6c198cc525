//! Fixed-interval retry strategy.
//!
//! The workshop makes one initial attempt per message and then asks the
//! strategy for a delay before each retry. The strategy is an iterator over
//! those delays: it yields `interval` exactly `max_retries` times.

use std::time::Duration;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedIntervalRetry {
    interval: Duration,
    max_retries: u32,
    retries: u32,
}

impl FixedIntervalRetry {
    pub fn new(interval: Duration, max_retries: u32) -> Result<Self, Error> {
        if interval.is_zero() {
            return Err(Error::invalid_parameter("retry interval must be non-zero"));
        }

        Ok(Self {
            interval,
            max_retries,
            retries: 0,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Retries handed out so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

impl Default for FixedIntervalRetry {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_retries: 5,
            retries: 0,
        }
    }
}

impl Iterator for FixedIntervalRetry {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.retries >= self.max_retries {
            return None;
        }
        self.retries += 1;
        Some(self.interval)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.max_retries - self.retries) as usize;
        (left, Some(left))
    }
}
