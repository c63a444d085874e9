//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::abort::AbortReason;
use crate::error::BraidError;

/// Wrap a future with a timeout. Expiry surfaces as an abort with
/// [`AbortReason::Timeout`], the same as a run-level deadline.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, BraidError>>,
) -> Result<T, BraidError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(timeout_ms = duration.as_millis() as u64, "call timed out");
            Err(BraidError::Aborted {
                reason: AbortReason::Timeout,
            })
        }
    }
}

/// Like [`with_timeout`], but a `None` duration waits indefinitely.
pub async fn with_optional_timeout<T>(
    duration: Option<Duration>,
    future: impl Future<Output = Result<T, BraidError>>,
) -> Result<T, BraidError> {
    match duration {
        Some(duration) => with_timeout(duration, future).await,
        None => future.await,
    }
}
