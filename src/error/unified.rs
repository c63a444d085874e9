//! Error classification shared by fatal errors and `error` stream parts.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Broad error category for routing recovery logic.
///
/// Serialized into `error` parts so stream consumers can tell a cancelled
/// run apart from a failed one without access to the original error value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorCategory {
    Authentication,
    RateLimit,
    Network,
    Timeout,
    Server,
    Api,
    Configuration,
    Serialization,
    Io,
    ToolExecution,
    NoOutput,
    Validation,
    StepLimit,
    Aborted,
    Stream,
    InvalidState,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    CheckCredentials,
    CheckConfiguration,
    IncreaseTimeout,
    RaiseStepLimit,
    CheckToolImplementation,
    CheckOutputSchema,
    None,
}
