//! Bounded retry with a fixed schedule of backoff delays.
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::Future;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_DELAYS: [Duration; 3] = [Duration::from_secs(1), Duration::from_secs(3), Duration::from_secs(5)];

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("no operation configured")]
    NoOperation,
    #[error("attempts exhausted after {attempts} tries: {last}")]
    Exhausted { attempts: usize, last: E },
    /// The error was classified as not worth retrying.
    #[error("non-retryable failure: {0}")]
    Rejected(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::NoOperation => None,
            RetryError::Exhausted { last, .. } | RetryError::Rejected(last) => Some(last),
        }
    }
}

/// Delay schedule plus the predicate deciding whether a failure deserves another attempt.
/// With `n` delays an operation runs at most `n + 1` times.
pub struct RetryPolicy<E> {
    delays: Vec<Duration>,
    retry_if: Arc<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self { Self { delays: self.delays.clone(), retry_if: Arc::clone(&self.retry_if) } }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self { Self { delays: DEFAULT_DELAYS.to_vec(), retry_if: Arc::new(|_| true) } }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy").field("delays", &self.delays).finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E> {
    pub fn new() -> Self { Self::default() }

    pub fn with_delays(mut self, delays: impl Into<Vec<Duration>>) -> Self {
        self.delays = delays.into();
        self
    }

    pub fn retry_if(mut self, pred: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retry_if = Arc::new(pred);
        self
    }

    pub fn delays(&self) -> &[Duration] { &self.delays }

    pub fn max_attempts(&self) -> usize { self.delays.len() + 1 }
}

#[derive(Debug)]
pub struct RetryExecutor<E> {
    policy: RetryPolicy<E>,
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self { Self { policy: self.policy.clone() } }
}

impl<E: Display> RetryExecutor<E> {
    pub fn new(policy: RetryPolicy<E>) -> Self { Self { policy } }

    pub fn policy(&self) -> &RetryPolicy<E> { &self.policy }

    /// Runs `op` if present. A missing operation fails immediately without sleeping.
    pub async fn run<T, F, Fut>(&self, op: Option<F>) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match op {
            Some(op) => self.call(op).await,
            None => Err(RetryError::NoOperation),
        }
    }

    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut delays = self.policy.delays.iter();
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let err = match op().await {
                Ok(v) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(v);
                }
                Err(e) => e,
            };
            if !(self.policy.retry_if)(&err) {
                warn!(attempt, error = %err, "non-retryable failure");
                return Err(RetryError::Rejected(err));
            }
            match delays.next() {
                Some(delay) => {
                    warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "attempt failed, retrying");
                    tokio::time::sleep(*delay).await;
                }
                None => {
                    warn!(attempts = attempt, error = %err, "retry attempts exhausted");
                    return Err(RetryError::Exhausted { attempts: attempt, last: err });
                }
            }
        }
    }
}
