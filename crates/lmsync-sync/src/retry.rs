//! Retry logic for read-only LMS calls
//!
//! Transient errors (rate limiting, server errors, timeouts, connection
//! failures) are retried with exponential backoff: base, 2x base, 4x base...
//! Uploads are never passed through here; repeating a half-finished upload
//! can create duplicates on the LMS.
//!
//! An error is transient when its chain carries a retryable
//! [`TransportError`]. Errors without one fall back to a textual check.
//! A `retry_after` hint on the error raises the backoff to at least that
//! long.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lmsync_core::config::CanvasConfig;
use lmsync_core::ports::TransportError;

use crate::SyncError;

/// Backoff settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubled for every further one
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Policy from the `canvas` configuration section
    #[must_use]
    pub fn from_config(config: &CanvasConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

/// Backoff before retry number `attempt` of the call that failed with `err`
fn retry_delay(policy: &RetryPolicy, attempt: u32, err: &anyhow::Error) -> Duration {
    let backoff = policy.delay_for(attempt);
    err.chain()
        .find_map(|cause| cause.downcast_ref::<TransportError>())
        .and_then(TransportError::retry_after)
        .map_or(backoff, |hint| hint.max(backoff))
}

/// Whether repeating the failed call may succeed
pub fn is_transient_error(err: &anyhow::Error) -> bool {
    if let Some(transport) = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<TransportError>())
    {
        return transport.is_retryable();
    }

    let err_str = format!("{err:#}").to_lowercase();

    // Network errors
    if err_str.contains("connection")
        || err_str.contains("timed out")
        || err_str.contains("timeout")
        || err_str.contains("reset by peer")
        || err_str.contains("broken pipe")
    {
        return true;
    }

    // Rate limiting
    if err_str.contains("429") || err_str.contains("too many requests") {
        return true;
    }

    // Server errors (5xx)
    err_str.contains("502")
        || err_str.contains("503")
        || err_str.contains("504")
        || err_str.contains("server error")
}

/// Run `f`, retrying transient failures per `policy`
///
/// A cancellation during a backoff sleep ends the call with
/// [`SyncError::Interrupted`]. The last error is returned otherwise.
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    f: F,
) -> Result<Result<T, anyhow::Error>, SyncError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0;

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Interrupted),
            result = f() => result,
        };

        match result {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(Ok(value));
            }
            Err(err) if attempt < policy.max_retries && is_transient_error(&err) => {
                let delay = retry_delay(policy, attempt, &err);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Transient error, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SyncError::Interrupted),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => return Ok(Err(err)),
        }
    }
}
