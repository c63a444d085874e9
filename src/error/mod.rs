//! Error types for braid.
//!
//! Failures come in two families. [`BraidError`] is fatal: it ends the run,
//! surfaces as the terminal `error` part of a stream, and is returned from
//! the synchronous APIs. [`ToolCallError`] is recoverable: it is captured as
//! `tool-error` content and the run keeps going.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use std::sync::Arc;

use thiserror::Error;

use crate::abort::AbortReason;

/// Primary error type for all braid operations.
#[derive(Error, Debug, Clone)]
pub enum BraidError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error ({provider}): {message}")]
    Provider {
        provider: String,
        message: String,
        status: Option<u16>,
        retryable: bool,
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    #[error("No output generated: {0}")]
    NoOutputGenerated(String),

    #[error("No object generated: {message}")]
    NoObjectGenerated {
        message: String,
        text: Option<String>,
    },

    #[error("Type validation failed: {message}")]
    TypeValidation {
        message: String,
        value: serde_json::Value,
    },

    #[error("Step limit exceeded: run did not finish within {max_steps} steps")]
    StepLimitExceeded { max_steps: usize },

    #[error("Aborted: {reason}")]
    Aborted { reason: AbortReason },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[source] Arc<serde_json::Error>),

    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl From<serde_json::Error> for BraidError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(err))
    }
}

impl From<std::io::Error> for BraidError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl BraidError {
    /// Create a provider error. Retryability is inferred from the status code.
    pub fn provider(
        provider: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        let retryable = matches!(status, Some(408 | 409 | 429) | Some(500..=599));
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status,
            retryable,
            source: None,
        }
    }

    /// Create a provider error wrapping an underlying transport failure.
    pub fn provider_with_source(
        provider: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status: None,
            retryable,
            source: Some(Arc::new(source)),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Provider { status, .. } => match status {
                Some(401 | 403) => ErrorCategory::Authentication,
                Some(429) => ErrorCategory::RateLimit,
                Some(408) => ErrorCategory::Timeout,
                Some(500..=599) => ErrorCategory::Server,
                Some(_) => ErrorCategory::Api,
                None => ErrorCategory::Network,
            },
            Self::NoOutputGenerated(_) | Self::NoObjectGenerated { .. } => ErrorCategory::NoOutput,
            Self::TypeValidation { .. } => ErrorCategory::Validation,
            Self::StepLimitExceeded { .. } => ErrorCategory::StepLimit,
            Self::Aborted { .. } => ErrorCategory::Aborted,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Io(_) => ErrorCategory::Io,
            Self::InvalidState(_) => ErrorCategory::InvalidState,
            Self::Stream(_) => ErrorCategory::Stream,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Whether this error was caused by cancellation or a timeout.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Server => {
                RecoverySuggestion::RetryWithBackoff
            }
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::StepLimit => RecoverySuggestion::RaiseStepLimit,
            ErrorCategory::ToolExecution => RecoverySuggestion::CheckToolImplementation,
            ErrorCategory::NoOutput | ErrorCategory::Validation => {
                RecoverySuggestion::CheckOutputSchema
            }
            _ => RecoverySuggestion::None,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, BraidError>;

/// Recoverable failure of a single tool call.
///
/// These never unwind a run. The step loop records them as `tool-error`
/// content and feeds them back to the model on the next step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("invalid tool input: {0}")]
    InputValidation(String),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("tool '{0}' is not registered")]
    NotFound(String),

    #[error("tool execution denied{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Denied { reason: Option<String> },
}

impl ToolCallError {
    /// Shorthand for an execution failure.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// The wire-level classification of this error.
    pub fn kind(&self) -> crate::types::ToolErrorKind {
        use crate::types::ToolErrorKind;
        match self {
            Self::InputValidation(_) => ToolErrorKind::InputValidation,
            Self::Execution(_) => ToolErrorKind::Execution,
            Self::NotFound(_) => ToolErrorKind::NotFound,
            Self::Denied { .. } => ToolErrorKind::Denied,
        }
    }
}
