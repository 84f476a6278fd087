//! Bounded retry with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` counts the first try; it is clamped to at least one.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt `attempt + 1`, given that `attempt` (1-based) failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exp)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt ceiling is reached. `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut, C>(&self, mut op: F, is_transient: C) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) && attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying: {err}"
                    );
                    time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if is_transient(&err) {
                        error!(attempt, "giving up after repeated failures: {err}");
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}
