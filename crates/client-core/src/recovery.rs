//! Retry and timeout helpers
//!
//! [`retry_at_fixed_interval`] drives the reconnect loop: wait one interval,
//! try, and repeat until the operation succeeds or `max_attempts` is reached.
//! Cancelling the token stops the loop at the next wait. [`with_timeout`] bounds a single operation.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{ClientError, ClientResult};

/// How a retry loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    /// The token fired before an attempt succeeded
    Cancelled { attempts: u32 },
    /// `max_attempts` were made and all failed
    Exhausted { attempts: u32, last_error: ClientError },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Cancelled { attempts }
            | RetryOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Succeeded { .. })
    }
}

/// Retry `operation` every `interval` until it succeeds
///
/// The first attempt happens one interval after the call. `operation`
/// receives the 1-based attempt number. Every error is retried; the loop only
/// stops early when `cancel` fires, including while an attempt is running.
pub async fn retry_at_fixed_interval<T, F, Fut>(
    operation_name: &str,
    interval: Duration,
    max_attempts: Option<u32>,
    cancel: &CancellationToken,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempt = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(operation = operation_name, attempts = attempt, "Retry loop cancelled");
                return RetryOutcome::Cancelled { attempts: attempt };
            }
            _ = ticker.tick() => {}
        }

        attempt += 1;
        debug!(operation = operation_name, attempt, ?max_attempts, "Attempting operation");

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(operation = operation_name, attempt, "Retry loop cancelled mid-attempt");
                return RetryOutcome::Cancelled { attempts: attempt };
            }
            result = operation(attempt) => result,
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Operation succeeded after retries");
                }
                return RetryOutcome::Succeeded { value, attempts: attempt };
            }
            Err(e) if max_attempts.is_some_and(|max| attempt >= max) => {
                error!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %e,
                    "Operation failed after all retry attempts"
                );
                return RetryOutcome::Exhausted { attempts: attempt, last_error: e };
            }
            Err(e) => {
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %e,
                    category = e.category(),
                    next_delay_ms = interval.as_millis() as u64,
                    "Attempt failed, will retry"
                );
            }
        }
    }
}

/// Bound `future` by `timeout`
pub async fn with_timeout<T, F>(operation_name: &str, timeout: Duration, future: F) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            error!(operation = operation_name, timeout_ms = timeout.as_millis() as u64, "Operation timed out");
            Err(ClientError::OperationTimeout { duration_ms: timeout.as_millis() as u64 })
        }
    }
}
