//! Bounded retries with a linear backoff schedule.
//!
//! Transient failures of external collaborators (image registries, the container daemon) are
//! expected. Instead of catching and looping ad-hoc, callers describe a [`RetryPolicy`] and get a
//! typed [`RetryError`] back once the budget is spent.

use std::{fmt, thread, time::Duration};

/// A bounded retry policy with linear backoff.
///
/// After the `n`-th failed attempt (zero-based) the caller sleeps for `n * step`, so the first
/// retry happens immediately and every following one waits one step longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one. Zero is treated as one.
    pub max_attempts: usize,
    /// The backoff step.
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(5, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Creates a new linear policy.
    pub const fn linear(max_attempts: usize, step: Duration) -> Self {
        Self { max_attempts, step }
    }

    /// A policy that runs the operation exactly once.
    pub const fn once() -> Self {
        Self::linear(1, Duration::ZERO)
    }

    /// Returns the effective number of attempts.
    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Returns the backoff schedule of this policy, i.e. the delays slept between attempts.
    pub fn delays(&self) -> LinearBackoff {
        LinearBackoff { step: self.step, retry_count: 0, max_retries: self.attempts() - 1 }
    }

    /// Runs `op` until it succeeds or the attempt budget is exhausted, blocking the current
    /// thread between attempts. The closure receives the zero-based attempt number.
    pub fn retry<T, E, F>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut(usize) -> Result<T, E>,
    {
        let mut backoff = self.delays();
        let mut attempt = 0;

        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(error) => {
                    attempt += 1;

                    let Some(delay) = backoff.next() else {
                        return Err(RetryError { attempts: attempt, last: error });
                    };

                    tracing::debug!(attempt, ?delay, %error, "attempt failed, backing off");
                    thread::sleep(delay);
                }
            }
        }
    }
}

/// An iterator over the delays of a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    step: Duration,
    /// Current number of retries.
    retry_count: usize,
    /// Maximum number of retries before the iterator is exhausted.
    max_retries: usize,
}

impl Iterator for LinearBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.retry_count >= self.max_retries {
            return None;
        }

        let delay = self.step.saturating_mul(self.retry_count as u32);
        self.retry_count += 1;

        Some(delay)
    }
}

/// Returned when every attempt of a [`RetryPolicy`] failed.
#[derive(Debug, thiserror::Error)]
#[error("gave up after {attempts} attempts: {last}")]
pub struct RetryError<E: fmt::Display> {
    /// How many attempts were made.
    pub attempts: usize,
    /// The error of the last attempt.
    pub last: E,
}

impl<E: fmt::Display> RetryError<E> {
    /// Returns the error of the last attempt.
    pub fn into_inner(self) -> E {
        self.last
    }
}
