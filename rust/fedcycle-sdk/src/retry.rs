//! Retry policy for the calls to the coordination service.

use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::ClientError;

/// How transient failures of a call to the coordination service are retried.
///
/// The delay before retry `n` (starting at `1`) is `base_delay * multiplier^(n - 1)`, capped
/// at `max_delay`. A `multiplier` of `1.0` gives a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts for a call, the first one included. Must be at least `1`.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// A policy that waits `delay` between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// The delay to wait before the given retry. `retry` starts at `1`.
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}

/// Why a retried call did not produce a value.
#[derive(Debug)]
pub(crate) enum RetryError {
    /// The job was cancelled, either while the call was in flight or during a backoff.
    Cancelled,
    /// The call failed with a transient error on every attempt.
    Exhausted { attempts: u32, source: ClientError },
    /// The call failed with an error that is not worth retrying.
    Fatal(ClientError),
}

/// Run `call` until it succeeds, fails with a non-transient error or runs out of attempts.
///
/// Backoff sleeps end early when `cancel` is triggered. A call that completes after the
/// cancellation has its result discarded.
pub(crate) async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &'static str,
    mut call: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = call().await;
        if cancel.is_cancelled() {
            debug!("{}: discarding result, the job was cancelled", operation);
            return Err(RetryError::Cancelled);
        }
        match result {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(RetryError::Fatal(e)),
            Err(e) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source: e,
                });
            }
            Err(e) => {
                let delay = policy.delay(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    operation, attempt, max_attempts, e, delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}
