//! Backoff applied when the local machine runs out of sockets.
use std::time::Duration;

/// How a task that hit descriptor exhaustion is retried.
///
/// Delays double from `initial_delay` up to `max_delay`. After
/// `max_retries` retries the task gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            max_retries: 50,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// A fresh delay sequence for one task.
    pub const fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            retries: 0,
        }
    }
}

/// Yields the delay before each retry, then `None` once the budget is spent.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    retries: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.retries >= self.policy.max_retries {
            return None;
        }

        let factor = 1_u32.checked_shl(self.retries).unwrap_or(u32::MAX);
        self.retries += 1;
        Some(
            self.policy
                .initial_delay
                .saturating_mul(factor)
                .min(self.policy.max_delay),
        )
    }
}
