//! Retry module.
//!
//! This module contains the policy bounding how many times a failed
//! synchronization pass is restarted after a reconnection.

use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: usize = 10;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Represents the number of restarts allowed after a failed pass.
    /// Zero means the first failure is fatal.
    pub max_retries: usize,
    /// Represents the pause before reconnecting.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Builds a policy restarting immediately.
    pub fn immediate(max_retries: usize) -> Self {
        Self::new(max_retries, Duration::ZERO)
    }

    /// Tells if a pass can be restarted after `failures` consecutive
    /// failed passes.
    pub fn allows(&self, failures: usize) -> bool {
        failures <= self.max_retries
    }
}
