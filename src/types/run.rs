//! Run records: the ordered steps of one caller-initiated generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use super::generation::FinishReason;
use super::message::ModelMessage;
use super::step::Step;
use super::stream::{ToolCall, ToolResult};
use super::usage::Usage;
use crate::error::BraidError;

/// Unique run identifier.
pub type RunId = Uuid;

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RunStatus {
    Running,
    Done,
    AwaitingApproval,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// A tool call waiting for an explicit decision from the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub approval_id: String,
    pub tool_call: ToolCall,
}

/// A run and its sealed steps. Steps are only ever appended; once the run
/// reaches a terminal status it no longer changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub status: RunStatus,
    pub steps: Vec<Step>,
    /// Messages produced by the run, ready to append to the conversation.
    pub response_messages: Vec<ModelMessage>,
    #[serde(default)]
    pub pending_approvals: Vec<PendingApproval>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(id: RunId) -> Self {
        Self {
            id,
            status: RunStatus::Running,
            steps: Vec::new(),
            response_messages: Vec::new(),
            pending_approvals: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Append a sealed step.
    pub fn push_step(&mut self, step: Step) -> Result<(), BraidError> {
        self.ensure_running()?;
        self.steps.push(step);
        Ok(())
    }

    /// Move the run to a terminal status.
    pub fn finish(&mut self, status: RunStatus) -> Result<(), BraidError> {
        self.ensure_running()?;
        self.status = status;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), BraidError> {
        if self.status.is_terminal() {
            return Err(BraidError::InvalidState(format!(
                "run {} is already {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// All text across steps, in order.
    pub fn text(&self) -> String {
        self.steps.iter().map(Step::text).collect()
    }

    pub fn reasoning_text(&self) -> String {
        self.steps.iter().map(Step::reasoning_text).collect()
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.steps.iter().flat_map(Step::tool_calls).collect()
    }

    pub fn tool_results(&self) -> Vec<&ToolResult> {
        self.steps.iter().flat_map(Step::tool_results).collect()
    }

    /// Sum of step usage, defined only if every step reported usage.
    pub fn total_usage(&self) -> Option<Usage> {
        Usage::sum(self.steps.iter().map(|s| s.usage.as_ref()))
    }

    /// Finish reason of the last step.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.steps.last().map(|s| s.finish_reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentBlock, StepKind};

    fn step(index: usize, text: &str, usage: Option<Usage>) -> Step {
        Step {
            index,
            kind: StepKind::Initial,
            input_messages: vec![],
            content: vec![ContentBlock::Text {
                id: "t".into(),
                text: text.into(),
            }],
            finish_reason: FinishReason::Stop,
            usage,
            provider_metadata: Default::default(),
            request_body: None,
            response_body: None,
            is_continued: false,
        }
    }

    #[test]
    fn terminal_runs_reject_new_steps() {
        let mut run = Run::new(Uuid::new_v4());
        run.push_step(step(0, "a", None)).unwrap();
        run.finish(RunStatus::Done).unwrap();

        assert!(run.push_step(step(1, "b", None)).is_err());
        assert!(run.finish(RunStatus::Failed).is_err());
        assert_eq!(run.steps.len(), 1);
    }

    #[test]
    fn derived_values_span_steps() {
        let mut run = Run::new(Uuid::new_v4());
        run.push_step(step(0, "Hello", Some(Usage::new(1, 1)))).unwrap();
        run.push_step(step(1, " world", None)).unwrap();

        assert_eq!(run.text(), "Hello world");
        assert_eq!(run.total_usage(), None);
        assert_eq!(run.finish_reason(), Some(FinishReason::Stop));
    }
}
