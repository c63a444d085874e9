use crate::error::BraidError;

use super::RunRequest;

pub(crate) const DEFAULT_MAX_STEPS: usize = 20;

#[derive(Debug, Clone, Copy)]
pub(super) struct StepLimits {
    pub(super) max_steps: usize,
}

impl StepLimits {
    pub(super) fn from_request(request: &RunRequest) -> Self {
        let max_steps = if request.max_steps == 0 {
            tracing::warn!(default = DEFAULT_MAX_STEPS, "max_steps of 0 ignored");
            DEFAULT_MAX_STEPS
        } else {
            request.max_steps
        };
        Self { max_steps }
    }

    /// Fails once issuing step `index` would exceed the limit.
    pub(super) fn check(&self, index: usize) -> Result<(), BraidError> {
        if index >= self.max_steps {
            return Err(BraidError::StepLimitExceeded {
                max_steps: self.max_steps,
            });
        }
        Ok(())
    }
}
