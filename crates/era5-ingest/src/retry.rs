//! Bounded retry with configurable backoff.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Wait strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * n` before attempt `n + 1`
    Linear { base: Duration },
    /// `initial`, doubling after every failure, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

/// Maximum attempts plus backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// Outcome of a retried operation that never succeeded.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn linear(max_attempts: u32, base: Duration) -> Self {
        Self::new(max_attempts, Backoff::Linear { base })
    }

    /// Delay after the `failed_attempt`-th failure (1-based).
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear { base } => base * failed_attempt,
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(failed_attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }

    /// Run `operation` until it succeeds, `retryable` rejects an error, or
    /// the attempts are used up.
    ///
    /// `operation` receives the 1-based attempt number. A non-retryable error
    /// is returned immediately as `Err` with the attempts made so far.
    pub async fn run<T, E, F, Fut>(
        &self,
        mut operation: F,
        retryable: impl Fn(&E) -> bool,
    ) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) || attempt >= self.max_attempts => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs(),
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
