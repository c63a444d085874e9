//! Non-streaming text generation and the final result of a run.

use serde::{Deserialize, Serialize};

use super::stream::stream_text;
use crate::error::BraidError;
use crate::step_loop::RunRequest;
use crate::types::{
    FinishReason, ModelMessage, PendingApproval, Run, RunId, RunStatus, Step, ToolCall, ToolResult,
    Usage,
};

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateTextResult {
    pub run_id: RunId,
    /// `done` or `awaiting-approval`.
    pub status: RunStatus,
    pub text: String,
    pub reasoning_text: String,
    pub steps: Vec<Step>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub finish_reason: FinishReason,
    /// Defined only when every step reported usage.
    pub total_usage: Option<Usage>,
    /// Append these to the conversation to continue it.
    pub response_messages: Vec<ModelMessage>,
    pub pending_approvals: Vec<PendingApproval>,
}

impl TryFrom<Run> for GenerateTextResult {
    type Error = BraidError;

    fn try_from(run: Run) -> Result<Self, Self::Error> {
        let Some(finish_reason) = run.finish_reason() else {
            return Err(BraidError::NoOutputGenerated(format!(
                "run {} finished without completing a step",
                run.id
            )));
        };
        Ok(Self {
            run_id: run.id,
            status: run.status,
            text: run.text(),
            reasoning_text: run.reasoning_text(),
            tool_calls: run.tool_calls().into_iter().cloned().collect(),
            tool_results: run.tool_results().into_iter().cloned().collect(),
            total_usage: run.total_usage(),
            finish_reason,
            steps: run.steps,
            response_messages: run.response_messages,
            pending_approvals: run.pending_approvals,
        })
    }
}

/// Run to completion and return the result.
pub async fn generate_text(request: RunRequest) -> Result<GenerateTextResult, BraidError> {
    stream_text(request).output().await
}
