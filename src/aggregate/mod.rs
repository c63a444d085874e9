//! Accumulates stream parts into text, step records and final metadata.
//!
//! The aggregator performs no I/O. Parts are applied strictly in arrival
//! order; once a `finish` or `error` part is seen nothing else is accepted.

use std::collections::HashMap;

use crate::error::{BraidError, ErrorCategory};
use crate::partial_json::{parse_partial, PartialValue};
use crate::types::{
    ContentBlock, FinishReason, ProviderMetadata, Step, StepKind, StreamPart, Usage,
};

/// Lifecycle of the aggregated run.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregatorState {
    Open,
    Finished {
        finish_reason: FinishReason,
        total_usage: Option<Usage>,
    },
    Failed {
        category: ErrorCategory,
        message: String,
    },
}

#[derive(Debug, Default)]
struct OpenStep {
    index: usize,
    /// Opened by an explicit `start-step` rather than by early content.
    started: bool,
    content: Vec<ContentBlock>,
}

impl OpenStep {
    fn append_text(&mut self, id: &str, delta: &str, reasoning: bool) {
        let existing = self.content.iter_mut().find_map(|block| match block {
            ContentBlock::Text { id: block_id, text } if !reasoning && block_id == id => Some(text),
            ContentBlock::Reasoning { id: block_id, text } if reasoning && block_id == id => {
                Some(text)
            }
            _ => None,
        });
        match existing {
            Some(text) => text.push_str(delta),
            None if reasoning => self.content.push(ContentBlock::Reasoning {
                id: id.to_string(),
                text: delta.to_string(),
            }),
            None => self.content.push(ContentBlock::Text {
                id: id.to_string(),
                text: delta.to_string(),
            }),
        }
    }
}

/// Folds a part stream into step records.
#[derive(Debug)]
pub struct ContentAggregator {
    state: AggregatorState,
    steps: Vec<Step>,
    current: Option<OpenStep>,
    tool_inputs: HashMap<String, String>,
}

impl Default for ContentAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentAggregator {
    pub fn new() -> Self {
        Self {
            state: AggregatorState::Open,
            steps: Vec::new(),
            current: None,
            tool_inputs: HashMap::new(),
        }
    }

    /// Apply one part.
    ///
    /// Content that arrives before any `start-step` opens the step implicitly;
    /// a later `start-step` adopts it instead of discarding it.
    pub fn apply(&mut self, part: &StreamPart) -> Result<(), BraidError> {
        if !matches!(self.state, AggregatorState::Open) {
            return Err(BraidError::InvalidState(format!(
                "aggregator is closed, rejected '{}' part",
                part.type_name()
            )));
        }

        match part {
            StreamPart::StartStep { index } => match self.current.as_mut() {
                Some(step) if step.started => {
                    return Err(BraidError::InvalidState(format!(
                        "start-step {index} while step {} is still open",
                        step.index
                    )));
                }
                Some(step) => {
                    step.started = true;
                    step.index = *index;
                }
                None => {
                    self.current = Some(OpenStep {
                        index: *index,
                        started: true,
                        content: Vec::new(),
                    });
                }
            },
            StreamPart::TextDelta { id, delta } => self.open_step().append_text(id, delta, false),
            StreamPart::ReasoningDelta { id, delta } => {
                self.open_step().append_text(id, delta, true)
            }
            StreamPart::ToolCallDelta {
                tool_call_id,
                input_text_delta,
                ..
            } => {
                self.tool_inputs
                    .entry(tool_call_id.clone())
                    .or_default()
                    .push_str(input_text_delta);
            }
            StreamPart::ToolCall(call) => {
                self.tool_inputs.remove(&call.tool_call_id);
                self.open_step().content.push(ContentBlock::ToolCall(call.clone()));
            }
            StreamPart::ToolResult(result) if result.preliminary => {}
            StreamPart::ToolResult(result) => {
                self.open_step()
                    .content
                    .push(ContentBlock::ToolResult(result.clone()));
            }
            StreamPart::ToolError(error) => {
                self.open_step()
                    .content
                    .push(ContentBlock::ToolError(error.clone()));
            }
            StreamPart::Source(source) => {
                self.open_step()
                    .content
                    .push(ContentBlock::Source(source.clone()));
            }
            StreamPart::File(file) => {
                self.open_step().content.push(ContentBlock::File(file.clone()));
            }
            StreamPart::FinishStep {
                finish_reason,
                usage,
                provider_metadata,
                is_continued,
            } => {
                // Inputs still streaming when the step ends never became calls.
                self.tool_inputs.clear();
                let step = self.current.take().unwrap_or_else(|| OpenStep {
                    index: self.steps.len(),
                    started: true,
                    content: Vec::new(),
                });
                self.steps.push(Step {
                    index: step.index,
                    kind: StepKind::Initial,
                    input_messages: Vec::new(),
                    content: step.content,
                    finish_reason: *finish_reason,
                    usage: usage.clone(),
                    provider_metadata: provider_metadata.clone(),
                    request_body: None,
                    response_body: None,
                    is_continued: *is_continued,
                });
            }
            StreamPart::Finish {
                finish_reason,
                total_usage,
            } => {
                let total_usage = total_usage
                    .clone()
                    .or_else(|| Usage::sum(self.steps.iter().map(|s| s.usage.as_ref())));
                self.state = AggregatorState::Finished {
                    finish_reason: *finish_reason,
                    total_usage,
                };
            }
            StreamPart::Error { category, message } => {
                self.state = AggregatorState::Failed {
                    category: *category,
                    message: message.clone(),
                };
            }
            StreamPart::TextStart { .. }
            | StreamPart::TextEnd { .. }
            | StreamPart::ReasoningStart { .. }
            | StreamPart::ReasoningEnd { .. }
            | StreamPart::ToolInputStart { .. }
            | StreamPart::ToolApprovalRequest { .. }
            | StreamPart::Raw { .. } => {}
        }
        Ok(())
    }

    fn open_step(&mut self) -> &mut OpenStep {
        let index = self.steps.len();
        self.current.get_or_insert_with(|| OpenStep {
            index,
            started: false,
            content: Vec::new(),
        })
    }

    pub fn state(&self) -> &AggregatorState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, AggregatorState::Open)
    }

    /// Sealed steps, in order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The most recently sealed step, for the owner to attach run metadata.
    pub(crate) fn last_step_mut(&mut self) -> Option<&mut Step> {
        self.steps.last_mut()
    }

    /// Content of the step that is still open.
    pub fn content(&self) -> &[ContentBlock] {
        self.current
            .as_ref()
            .map(|s| s.content.as_slice())
            .unwrap_or_default()
    }

    fn all_blocks(&self) -> impl Iterator<Item = &ContentBlock> {
        self.steps
            .iter()
            .flat_map(|s| s.content.iter())
            .chain(self.content().iter())
    }

    /// All text so far, across steps.
    pub fn text(&self) -> String {
        self.all_blocks()
            .filter_map(|block| match block {
                ContentBlock::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Text accumulated under one part id.
    pub fn text_for(&self, id: &str) -> String {
        self.all_blocks()
            .filter_map(|block| match block {
                ContentBlock::Text { id: block_id, text } if block_id == id => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn reasoning_text(&self) -> String {
        self.all_blocks()
            .filter_map(|block| match block {
                ContentBlock::Reasoning { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Raw input text streamed so far for a tool call that is not complete yet.
    pub fn tool_input_text(&self, tool_call_id: &str) -> Option<&str> {
        self.tool_inputs.get(tool_call_id).map(String::as_str)
    }

    /// Best-effort parse of a streaming tool input.
    pub fn partial_tool_input(&self, tool_call_id: &str) -> PartialValue {
        self.tool_input_text(tool_call_id)
            .map(parse_partial)
            .unwrap_or(PartialValue::Undefined)
    }

    /// Overall finish reason, available once `finish` was applied.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        match &self.state {
            AggregatorState::Finished { finish_reason, .. } => Some(*finish_reason),
            _ => None,
        }
    }

    /// Sealed total usage, available once `finish` was applied.
    pub fn total_usage(&self) -> Option<&Usage> {
        match &self.state {
            AggregatorState::Finished { total_usage, .. } => total_usage.as_ref(),
            _ => None,
        }
    }

    /// A step record for the open step as if it finished now.
    pub fn preview_step(
        &self,
        finish_reason: FinishReason,
        usage: Option<Usage>,
        provider_metadata: ProviderMetadata,
    ) -> Step {
        Step {
            index: self.current.as_ref().map(|s| s.index).unwrap_or(self.steps.len()),
            kind: StepKind::Initial,
            input_messages: Vec::new(),
            content: self.content().to_vec(),
            finish_reason,
            usage,
            provider_metadata,
            request_body: None,
            response_body: None,
            is_continued: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ToolCall, ToolResult};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn apply_all(agg: &mut ContentAggregator, parts: &[StreamPart]) {
        for part in parts {
            agg.apply(part).unwrap();
        }
    }

    #[test]
    fn hello_world_scenario() {
        let mut agg = ContentAggregator::new();
        apply_all(
            &mut agg,
            &[
                StreamPart::StartStep { index: 0 },
                StreamPart::text_delta("t", "Hello"),
                StreamPart::text_delta("t", " world"),
                StreamPart::finish_step(FinishReason::Stop, None),
                StreamPart::Finish {
                    finish_reason: FinishReason::Stop,
                    total_usage: None,
                },
            ],
        );

        assert_eq!(agg.text(), "Hello world");
        assert_eq!(agg.steps().len(), 1);
        assert_eq!(agg.finish_reason(), Some(FinishReason::Stop));
    }

    #[test]
    fn interleaved_ids_keep_separate_buffers() {
        let mut agg = ContentAggregator::new();
        apply_all(
            &mut agg,
            &[
                StreamPart::StartStep { index: 0 },
                StreamPart::text_delta("a", "1"),
                StreamPart::ReasoningDelta {
                    id: "r".into(),
                    delta: "think".into(),
                },
                StreamPart::text_delta("b", "x"),
                StreamPart::text_delta("a", "2"),
                StreamPart::text_delta("b", "y"),
            ],
        );

        assert_eq!(agg.text_for("a"), "12");
        assert_eq!(agg.text_for("b"), "xy");
        assert_eq!(agg.reasoning_text(), "think");
        assert_eq!(agg.content().len(), 3);
    }

    #[test]
    fn early_content_is_carried_into_the_next_step() {
        let mut agg = ContentAggregator::new();
        let result = ToolResult {
            tool_call_id: "c1".into(),
            tool_name: "echo".into(),
            input: json!({}),
            output: json!("ok"),
            preliminary: false,
        };
        apply_all(
            &mut agg,
            &[
                StreamPart::ToolResult(result.clone()),
                StreamPart::StartStep { index: 0 },
                StreamPart::text_delta("t", "done"),
                StreamPart::finish_step(FinishReason::Stop, None),
            ],
        );

        let step = &agg.steps()[0];
        assert_eq!(step.content[0], ContentBlock::ToolResult(result));
        assert_eq!(step.text(), "done");
    }

    #[test]
    fn tool_input_deltas_parse_partially() {
        let mut agg = ContentAggregator::new();
        apply_all(
            &mut agg,
            &[
                StreamPart::ToolInputStart {
                    tool_call_id: "c1".into(),
                    tool_name: "weather".into(),
                },
                StreamPart::ToolCallDelta {
                    tool_call_id: "c1".into(),
                    tool_name: "weather".into(),
                    input_text_delta: r#"{"city": "Os"#.into(),
                },
            ],
        );
        assert_eq!(
            agg.partial_tool_input("c1"),
            PartialValue::Partial(json!({"city": "Os"}))
        );

        agg.apply(&StreamPart::ToolCall(ToolCall::new(
            "c1",
            "weather",
            json!({"city": "Oslo"}),
        )))
        .unwrap();
        assert_eq!(agg.partial_tool_input("c1"), PartialValue::Undefined);
    }

    #[test]
    fn unfinished_tool_inputs_are_dropped_with_their_step() {
        let mut agg = ContentAggregator::new();
        apply_all(
            &mut agg,
            &[
                StreamPart::StartStep { index: 0 },
                StreamPart::ToolCallDelta {
                    tool_call_id: "c1".into(),
                    tool_name: "weather".into(),
                    input_text_delta: r#"{"city": "Os"#.into(),
                },
            ],
        );
        assert_eq!(agg.tool_input_text("c1"), Some(r#"{"city": "Os"#));

        agg.apply(&StreamPart::finish_step(FinishReason::Length, None))
            .unwrap();
        assert_eq!(agg.tool_input_text("c1"), None);
        assert_eq!(agg.partial_tool_input("c1"), PartialValue::Undefined);
    }

    #[test]
    fn preliminary_results_are_not_content() {
        let mut agg = ContentAggregator::new();
        agg.apply(&StreamPart::ToolResult(ToolResult {
            tool_call_id: "c1".into(),
            tool_name: "t".into(),
            input: json!(null),
            output: json!(1),
            preliminary: true,
        }))
        .unwrap();
        assert!(agg.content().is_empty());
    }

    #[test]
    fn error_closes_the_aggregator() {
        let mut agg = ContentAggregator::new();
        agg.apply(&StreamPart::text_delta("t", "partial")).unwrap();
        agg.apply(&StreamPart::Error {
            category: ErrorCategory::Server,
            message: "boom".into(),
        })
        .unwrap();

        assert!(agg.apply(&StreamPart::text_delta("t", "more")).is_err());
        assert_eq!(agg.text(), "partial");
        assert!(matches!(agg.state(), AggregatorState::Failed { .. }));
    }

    #[test]
    fn double_start_step_is_rejected() {
        let mut agg = ContentAggregator::new();
        agg.apply(&StreamPart::StartStep { index: 0 }).unwrap();
        assert!(agg.apply(&StreamPart::StartStep { index: 1 }).is_err());
    }

    #[test]
    fn total_usage_falls_back_to_step_sum() {
        let mut agg = ContentAggregator::new();
        apply_all(
            &mut agg,
            &[
                StreamPart::finish_step(FinishReason::ToolCalls, Some(Usage::new(1, 2))),
                StreamPart::finish_step(FinishReason::Stop, Some(Usage::new(3, 4))),
                StreamPart::Finish {
                    finish_reason: FinishReason::Stop,
                    total_usage: None,
                },
            ],
        );
        assert_eq!(agg.total_usage(), Some(&Usage::new(4, 6)));
        assert_eq!(agg.steps()[1].index, 1);
    }
}
