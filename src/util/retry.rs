//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::abort::{AbortReason, AbortSignal};
use crate::error::BraidError;

/// Retry policy for model calls.
///
/// Only errors that report [`BraidError::is_retryable`] are retried. An abort
/// during a backoff sleep ends the retry loop immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial backoff duration.
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    #[serde(with = "millis")]
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Execute an async operation with retry.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, BraidError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BraidError>>,
    {
        self.execute_with_abort(&AbortSignal::new(), operation).await
    }

    /// Execute an async operation with retry, giving up as soon as `abort` fires.
    pub async fn execute_with_abort<F, Fut, T>(
        &self,
        abort: &AbortSignal,
        mut operation: F,
    ) -> Result<T, BraidError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BraidError>>,
    {
        let mut backoff = self.initial_backoff;
        let max_attempts = self.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            if let Some(reason) = abort.reason() {
                return Err(BraidError::Aborted { reason });
            }
            let e = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            attempt += 1;
            if !e.is_retryable() || attempt >= max_attempts {
                return Err(e);
            }

            tracing::warn!(
                attempt,
                max_attempts,
                error = %e,
                "Retrying after error"
            );

            // Jitter: 75%–125% of backoff
            let jitter_factor = 0.75 + (rand_factor() * 0.5);
            let sleep_duration =
                Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor);
            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    return Err(BraidError::Aborted {
                        reason: abort.reason().unwrap_or(AbortReason::User),
                    });
                }
                _ = tokio::time::sleep(sleep_duration) => {}
            }

            backoff = Duration::from_secs_f64(
                (backoff.as_secs_f64() * self.multiplier).min(self.max_backoff.as_secs_f64()),
            );
        }
    }
}

/// Simple pseudo-random factor [0, 1) without pulling in rand crate.
fn rand_factor() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);

    let hash = hasher.finish();
    (hash % 10000) as f64 / 10000.0
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
