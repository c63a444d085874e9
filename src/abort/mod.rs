//! Cancellation: one abort signal per run, timeouts as timer-triggered aborts.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;

/// Why a run was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AbortReason {
    /// The caller requested cancellation.
    User,
    /// A deadline elapsed.
    Timeout,
}

/// Read side of an abort. Cheap to clone; every clone observes the same state.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<AbortReason>>,
    parent: Option<Box<AbortSignal>>,
}

impl AbortSignal {
    /// A signal that nothing will ever trigger unless it is handed to a controller.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason for the abort, if one happened. The first reason recorded wins.
    pub fn reason(&self) -> Option<AbortReason> {
        if !self.is_aborted() {
            return None;
        }
        self.reason
            .get()
            .copied()
            .or_else(|| self.parent.as_ref().and_then(|p| p.reason()))
            .or(Some(AbortReason::User))
    }

    /// Resolves once the signal fires.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// A child signal: it fires when this one does, and may also fire on its own
    /// (for example from a timer) without affecting the parent.
    pub fn child(&self) -> AbortSignal {
        AbortSignal {
            token: self.token.child_token(),
            reason: Arc::new(OnceLock::new()),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// The underlying token, for collaborators that speak `tokio_util` directly.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn trigger(&self, reason: AbortReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    /// Arm a timer that aborts this signal with [`AbortReason::Timeout`].
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn arm_timeout(&self, duration: Duration) {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    tracing::debug!(timeout_ms = duration.as_millis() as u64, "run timed out");
                    signal.trigger(AbortReason::Timeout);
                }
                _ = signal.cancelled() => {}
            }
        });
    }
}

/// Write side of an abort.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    /// A controller that aborts itself after `duration`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(duration: Duration) -> Self {
        let controller = Self::new();
        controller.signal.arm_timeout(duration);
        controller
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Abort on behalf of the caller. Idempotent.
    pub fn abort(&self) {
        self.signal.trigger(AbortReason::User);
    }

    pub fn abort_with(&self, reason: AbortReason) {
        self.signal.trigger(reason);
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }
}
