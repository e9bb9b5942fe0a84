//! Bounded retry with backoff.
//!
//! A [`RetryPolicy`] runs an async operation up to `max_attempts` times. Between
//! attempts it sleeps for the delay computed by its [`Backoff`]. A caller-supplied
//! predicate decides whether an error is worth another attempt; permanent errors
//! end the loop immediately.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base * 2^(attempt-1)`, capped at `cap`.
    Exponential { base: Duration, cap: Duration },
}

impl Backoff {
    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, cap } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.checked_mul(factor).unwrap_or(cap).min(cap)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included. Never below 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// Final result plus how many attempts were spent reaching it.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential { base, cap },
        }
    }

    /// Single attempt, no delay.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Retry every error.
    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_if(label, op, |_| true).await
    }

    /// Retry only errors for which `retryable` returns true.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run_if<T, E, F, Fut, P>(
        &self,
        label: &str,
        mut op: F,
        retryable: P,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", label, attempt);
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    if attempt >= max_attempts || !retryable(&err) {
                        return RetryOutcome {
                            result: Err(err),
                            attempts: attempt,
                        };
                    }
                    let delay = self.backoff.delay_after(attempt);
                    warn!(
                        "{} attempt {}/{} failed: {} (retrying in {:?})",
                        label, attempt, max_attempts, err, delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
