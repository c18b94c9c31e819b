/*!
 * Bounded retry with exponential backoff.
 *
 * A single policy type serves both the per-call retries of the translation
 * client and the per-job backoff of the queue, so the delay curve and the
 * attempt ceiling are defined in one place.
 */

use log::debug;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff policy with an attempt ceiling
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound of any single delay
    pub max_delay: Duration,
    /// Add up to 10% random jitter to each delay
    pub jitter: bool,
}

/// Result of running an operation under a retry policy
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Number of attempts actually made
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    /// A policy that never retries
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Disable jitter (deterministic delays)
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let raw = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = raw.min(self.max_delay.max(self.base_delay));

        if !self.jitter || capped.is_zero() {
            return capped;
        }
        let jitter_ms = (capped.as_millis() as u64) / 10;
        if jitter_ms == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt ceiling is reached
    pub async fn run<T, E, F, Fut, R>(&self, label: &str, mut op: F, is_retryable: R) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return RetryOutcome { result: Ok(value), attempts: attempt },
                Err(error) => {
                    if attempt >= self.max_attempts || !is_retryable(&error) {
                        return RetryOutcome { result: Err(error), attempts: attempt };
                    }
                    let delay = self.delay_for(attempt);
                    debug!(
                        "{}: attempt {}/{} failed ({}), retrying in {:?}",
                        label, attempt, self.max_attempts, error, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30))
    }
}
