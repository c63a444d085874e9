//! Lifecycle of a single tool call.

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// Where a tool call is in its lifecycle.
///
/// ```text
/// input-streaming -> input-available -> [executing] -> output-available | output-error
///                                  \-> awaiting-approval -> approved -> ...
///                                                        \-> denied
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ToolInvocationState {
    InputStreaming,
    InputAvailable,
    AwaitingApproval,
    Approved,
    Denied,
    Executing,
    OutputAvailable,
    OutputError,
}

/// A state change the lifecycle does not allow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid tool invocation transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ToolInvocationState,
    pub to: ToolInvocationState,
}

impl ToolInvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::OutputAvailable | Self::OutputError | Self::Denied)
    }

    pub fn can_transition_to(self, next: ToolInvocationState) -> bool {
        use ToolInvocationState::*;
        matches!(
            (self, next),
            (InputStreaming, InputStreaming | InputAvailable | OutputError)
                | (InputAvailable, AwaitingApproval | Executing | OutputAvailable | OutputError)
                | (AwaitingApproval, Approved | Denied)
                | (Approved, Executing | OutputAvailable | OutputError)
                | (Executing, OutputAvailable | OutputError)
                // A preliminary output is followed by more output.
                | (OutputAvailable, OutputAvailable | OutputError)
        )
    }

    pub fn transition(self, next: ToolInvocationState) -> Result<Self, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}
