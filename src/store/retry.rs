// src/store/retry.rs

//! Bounded retries with jittered exponential backoff
//!
//! Every remote call made through a [`super::Bucket`] runs under its own
//! [`RetryPolicy::run`] loop; no backoff state is shared between calls.

use crate::error::{Error, Result};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default retry budget for store operations
pub const DEFAULT_ATTEMPTS: u32 = 20;

/// Backoff tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub min: Duration,
    /// Upper bound for any single delay
    pub max: Duration,
    /// Growth factor between consecutive retries
    pub factor: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(100),
            max: Duration::from_secs(5),
            factor: 2,
        }
    }
}

impl BackoffConfig {
    /// Millisecond-scale backoff for tests and local backends
    pub fn fast() -> Self {
        Self {
            min: Duration::from_millis(1),
            max: Duration::from_millis(8),
            factor: 2,
        }
    }

    /// Lower edge of the delay window for retry `step` (0-based)
    fn floor(&self, step: u32) -> Duration {
        let growth = self.factor.max(1).saturating_pow(step);
        self.min.saturating_mul(growth).min(self.max)
    }
}

/// Delay sequence for one retry loop
///
/// Retry `k` sleeps for a random duration between `min * factor^k` and
/// `min * factor^(k+1)`, both capped at `max`. Consecutive windows share an
/// edge, so delays never decrease and never exceed the cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    step: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, step: 0 }
    }

    /// Delay before the next retry
    pub fn next_delay(&mut self) -> Duration {
        let low = self.config.floor(self.step);
        let high = self.config.floor(self.step.saturating_add(1));
        self.step = self.step.saturating_add(1);

        let jitter = (high - low).mul_f64(rand::random::<f64>());
        (low + jitter).min(self.config.max)
    }

    /// Number of delays handed out so far
    pub fn retries(&self) -> u32 {
        self.step
    }
}

/// Attempt budget plus backoff for one store operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, BackoffConfig::default())
    }
}

impl RetryPolicy {
    /// A zero budget is treated as a single attempt
    pub fn new(attempts: u32, backoff: BackoffConfig) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn backoff(&self) -> BackoffConfig {
        self.backoff
    }

    /// Run `op` until it succeeds or the attempt budget is spent
    ///
    /// Errors that cannot be fixed by retrying (missing objects,
    /// configuration problems) are returned immediately. A retry that would
    /// sleep past `deadline` fails with [`Error::DeadlineExceeded`].
    pub fn run<T, F>(
        &self,
        operation: &'static str,
        target: &str,
        deadline: Option<Instant>,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut backoff = Backoff::new(self.backoff);
        let mut attempt = 0;

        loop {
            attempt += 1;

            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return Err(Error::DeadlineExceeded(format!(
                    "{operation} {target} not started before deadline"
                )));
            }

            let err = match op() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} {} succeeded on attempt {}", operation, target, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= self.attempts {
                return Err(Error::RetriesExhausted {
                    operation,
                    target: target.to_string(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = backoff.next_delay();
            if let Some(deadline) = deadline
                && Instant::now() + delay >= deadline
            {
                return Err(Error::DeadlineExceeded(format!(
                    "{operation} {target} gave up after {attempt} attempts: {err}"
                )));
            }

            warn!(
                "{} {} attempt {}/{} failed: {}, retrying in {:?}",
                operation, target, attempt, self.attempts, err, delay
            );
            std::thread::sleep(delay);
        }
    }
}
