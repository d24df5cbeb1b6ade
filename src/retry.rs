//! Retry logic with exponential backoff
//!
//! Two users:
//! - the Retry queue, which delays a soft-failed command by
//!   [`backoff_delay`] before it may run again
//! - the queue flush, which retries a write that hit a locked database via
//!   [`with_retry`]
//!
//! # Example
//!
//! ```no_run
//! use command_scheduler::retry::{IsRetryable, with_retry};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! with_retry(3, Duration::from_millis(100), || async {
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, ExecutionError};
use crate::task::FailureKind;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ExecutionError {
    fn is_retryable(&self) -> bool {
        !self.is_hard()
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // A locked or busy database clears up once the other writer is done
            Error::Sqlx(_) | Error::Database(_) => {
                crate::task::TaskFailure::from_error(self).kind == FailureKind::StorageLocked
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
            ),
            Error::Config { .. }
            | Error::Serialization(_)
            | Error::NotFound(_)
            | Error::ShuttingDown
            | Error::InvalidTaskState { .. }
            | Error::ApiServerError(_)
            | Error::Other(_) => false,
        }
    }
}

/// Delay before the next execution of a command that failed `failures` times in a row
///
/// `initial_delay * backoff_multiplier^(failures - 1)`, jittered when enabled,
/// never more than `max_delay`.
pub fn backoff_delay(config: &RetryConfig, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(32) as i32;
    let secs = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let delay = Duration::from_secs_f64(secs.min(config.max_delay.as_secs_f64()));
    let delay = if config.jitter {
        add_jitter(delay)
    } else {
        delay
    };
    delay.min(config.max_delay)
}

/// Execute an async operation, retrying retryable failures with doubling delays
///
/// Makes at most `max_attempts` attempts in total.
pub async fn with_retry<F, Fut, T, E>(
    max_attempts: u32,
    initial_delay: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 1;
    let mut delay = initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                tokio::time::sleep(add_jitter(delay)).await;
                attempt += 1;
                delay = delay.saturating_mul(2);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
