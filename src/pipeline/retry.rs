//! Retry policy shared by every call to the completion service.
//!
//! One policy object (attempt ceiling + backoff + sleeper) is injected into
//! each adapter. Errors decide for themselves whether another attempt is
//! worthwhile via [`Retryable`]. A policy bound to a [`CancellationToken`]
//! lets the call in flight finish but starts no further attempt once the
//! token is set.
//!
//! Defaults follow the observed behaviour of the hosted service: up to 20
//! attempts with a fixed 2 second pause between them.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::batch::CancellationToken;

/// Default attempt ceiling for extraction and classification calls.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;

/// Classifies an error as transient (worth another attempt) or fatal.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Blocks the current thread between attempts. Injected so tests never sleep.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by `std::thread::sleep`.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Sleeper that records requested delays without blocking.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Backoff {
    /// Same pause before every retry.
    Fixed { delay_ms: u64 },
    /// `initial_ms * factor^(n-1)`, capped at `max_ms`.
    Exponential {
        initial_ms: u64,
        factor: f64,
        max_ms: u64,
    },
}

impl Backoff {
    /// Pause before retry number `retry` (1-based: the pause after the first failure is retry 1).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential {
                initial_ms,
                factor,
                max_ms,
            } => {
                let exponent = retry.saturating_sub(1) as i32;
                let raw = initial_ms as f64 * factor.max(1.0).powi(exponent);
                Duration::from_millis(raw.min(max_ms as f64) as u64)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed {
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

/// A successful value plus the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

impl<T> Attempted<T> {
    /// Attempts beyond the first.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Attempted<U> {
        Attempted {
            value: f(self.value),
            attempts: self.attempts,
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("non-retryable failure on attempt {attempt}: {error}")]
    Fatal { attempt: u32, error: E },

    #[error("cancelled after {attempts} attempts: {last}")]
    Cancelled { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
            RetryError::Fatal { attempt, .. } => *attempt,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } | RetryError::Cancelled { last, .. } => last,
            RetryError::Fatal { error, .. } => error,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

/// Attempt ceiling, backoff schedule and sleeper.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    sleeper: Arc<dyn Sleeper>,
    cancel: Option<CancellationToken>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("cancellable", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, Backoff::default())
    }
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            sleeper: Arc::new(ThreadSleeper),
            cancel: None,
        }
    }

    /// Single attempt, no pauses.
    pub fn no_retry() -> Self {
        Self::new(1, Backoff::Fixed { delay_ms: 0 })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Stop between attempts once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Run `op` until it succeeds, fails fatally, or the ceiling is reached.
    ///
    /// `op` receives the 1-based attempt number. `on_retry` is told about every
    /// retryable failure before the pause. Cancellation is checked after
    /// `on_retry` and again after the pause.
    pub fn run<T, E, F, R>(&self, mut op: F, mut on_retry: R) -> Result<Attempted<T>, RetryError<E>>
    where
        E: Retryable,
        F: FnMut(u32) -> Result<T, E>,
        R: FnMut(u32, &E),
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    })
                }
                Err(error) if !error.is_retryable() => {
                    return Err(RetryError::Fatal { attempt, error });
                }
                Err(last) if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last,
                    });
                }
                Err(error) => {
                    on_retry(attempt, &error);
                    if !self.cancelled() {
                        self.sleeper.sleep(self.backoff.delay_for(attempt));
                    }
                    if self.cancelled() {
                        tracing::info!(attempt, "Retry loop cancelled");
                        return Err(RetryError::Cancelled {
                            attempts: attempt,
                            last: error,
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }
}
