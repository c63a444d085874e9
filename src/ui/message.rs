//! UI messages and their incremental reconstruction from UI chunks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::chunk::UiChunk;
use crate::error::BraidError;
use crate::partial_json::parse_partial;
use crate::tools::ToolInvocationState;

/// Who authored a UI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiRole {
    System,
    User,
    Assistant,
}

/// Whether a text or reasoning part is still receiving deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UiTextState {
    Streaming,
    Done,
}

/// An approval attached to a tool part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiApproval {
    pub id: String,
    /// `None` until the user answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A tool invocation as rendered in the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiToolPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub state: ToolInvocationState,
    /// Partial while the input streams, complete afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<UiApproval>,
    /// The output is a preliminary value of a streaming tool.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub preliminary: bool,
}

impl UiToolPart {
    fn new(tool_call_id: &str, tool_name: &str, state: ToolInvocationState) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            state,
            input: None,
            output: None,
            error_text: None,
            approval: None,
            preliminary: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiPart {
    Text {
        text: String,
        state: UiTextState,
    },
    Reasoning {
        text: String,
        state: UiTextState,
    },
    Tool(UiToolPart),
    SourceUrl {
        source_id: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    SourceDocument {
        source_id: String,
        media_type: String,
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    File {
        media_type: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    StepStart,
}

impl UiPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            state: UiTextState::Done,
        }
    }
}

/// A message as clients render and persist it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiMessage {
    pub id: String,
    pub role: UiRole,
    pub parts: Vec<UiPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl UiMessage {
    pub fn new(id: impl Into<String>, role: UiRole) -> Self {
        Self {
            id: id.into(),
            role,
            parts: Vec::new(),
            metadata: None,
        }
    }

    /// A user message with a generated id.
    pub fn user(text: impl Into<String>) -> Self {
        let mut message = Self::new(generate_message_id(), UiRole::User);
        message.parts.push(UiPart::text(text));
        message
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                UiPart::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_parts(&self) -> impl Iterator<Item = &UiToolPart> {
        self.parts.iter().filter_map(|part| match part {
            UiPart::Tool(tool) => Some(tool),
            _ => None,
        })
    }

    fn tool_part_mut(&mut self, tool_call_id: &str) -> Option<&mut UiToolPart> {
        self.parts.iter_mut().find_map(|part| match part {
            UiPart::Tool(tool) if tool.tool_call_id == tool_call_id => Some(tool),
            _ => None,
        })
    }

    /// Record the user's answer to a pending approval. Converting the message
    /// back to model messages then carries the response to the next run.
    pub fn respond_to_approval(
        &mut self,
        approval_id: &str,
        approved: bool,
        reason: Option<String>,
    ) -> Result<(), BraidError> {
        let tool = self
            .parts
            .iter_mut()
            .find_map(|part| match part {
                UiPart::Tool(tool)
                    if tool.approval.as_ref().is_some_and(|a| a.id == approval_id) =>
                {
                    Some(tool)
                }
                _ => None,
            })
            .ok_or_else(|| BraidError::InvalidState(format!("unknown approval {approval_id}")))?;

        let next = if approved {
            ToolInvocationState::Approved
        } else {
            ToolInvocationState::Denied
        };
        tool.state = tool
            .state
            .transition(next)
            .map_err(|e| BraidError::InvalidState(e.to_string()))?;
        if let Some(approval) = tool.approval.as_mut() {
            approval.approved = Some(approved);
            approval.reason = reason;
        }
        Ok(())
    }
}

pub(crate) fn generate_message_id() -> String {
    format!("msg-{}", Uuid::new_v4().simple())
}

/// Shallow-merge object metadata; anything else replaces.
fn merge_metadata(current: &mut Option<Value>, update: &Option<Value>) {
    let Some(update) = update else {
        return;
    };
    if let (Some(Value::Object(existing)), Value::Object(incoming)) = (current.as_mut(), update) {
        for (key, value) in incoming {
            existing.insert(key.clone(), value.clone());
        }
        return;
    }
    *current = Some(update.clone());
}

/// Applies UI chunks, in order, to one assistant message.
#[derive(Debug, Clone)]
pub struct UiMessageBuilder {
    message: UiMessage,
    active_text: HashMap<String, usize>,
    active_reasoning: HashMap<String, usize>,
    tool_inputs: HashMap<String, String>,
}

impl UiMessageBuilder {
    /// Continue `message`, or start from it if it is empty.
    pub fn new(message: UiMessage) -> Self {
        Self {
            message,
            active_text: HashMap::new(),
            active_reasoning: HashMap::new(),
            tool_inputs: HashMap::new(),
        }
    }

    /// Start a fresh assistant message.
    pub fn assistant(id: impl Into<String>) -> Self {
        Self::new(UiMessage::new(id, UiRole::Assistant))
    }

    pub fn message(&self) -> &UiMessage {
        &self.message
    }

    pub fn into_message(self) -> UiMessage {
        self.message
    }

    pub fn apply(&mut self, chunk: &UiChunk) -> Result<(), BraidError> {
        match chunk {
            UiChunk::Start {
                message_id,
                message_metadata,
            } => {
                if let Some(id) = message_id {
                    self.message.id = id.clone();
                }
                merge_metadata(&mut self.message.metadata, message_metadata);
            }
            UiChunk::Finish { message_metadata } => {
                merge_metadata(&mut self.message.metadata, message_metadata);
            }
            UiChunk::Abort | UiChunk::Error { .. } | UiChunk::FinishStep => {}
            UiChunk::StartStep => self.message.parts.push(UiPart::StepStart),
            UiChunk::TextStart { id } => {
                self.active_text.insert(id.clone(), self.message.parts.len());
                self.message.parts.push(UiPart::Text {
                    text: String::new(),
                    state: UiTextState::Streaming,
                });
            }
            UiChunk::TextDelta { id, delta } => {
                if let UiPart::Text { text, .. } = self.active_part(Active::Text, id)? {
                    text.push_str(delta);
                }
            }
            UiChunk::TextEnd { id } => {
                if let UiPart::Text { state, .. } = self.active_part(Active::Text, id)? {
                    *state = UiTextState::Done;
                }
                self.active_text.remove(id);
            }
            UiChunk::ReasoningStart { id } => {
                self.active_reasoning
                    .insert(id.clone(), self.message.parts.len());
                self.message.parts.push(UiPart::Reasoning {
                    text: String::new(),
                    state: UiTextState::Streaming,
                });
            }
            UiChunk::ReasoningDelta { id, delta } => {
                if let UiPart::Reasoning { text, .. } = self.active_part(Active::Reasoning, id)? {
                    text.push_str(delta);
                }
            }
            UiChunk::ReasoningEnd { id } => {
                if let UiPart::Reasoning { state, .. } = self.active_part(Active::Reasoning, id)? {
                    *state = UiTextState::Done;
                }
                self.active_reasoning.remove(id);
            }
            UiChunk::ToolInputStart {
                tool_call_id,
                tool_name,
            } => {
                self.tool_inputs.insert(tool_call_id.clone(), String::new());
                self.upsert_tool(tool_call_id, tool_name, |tool| {
                    tool.state = ToolInvocationState::InputStreaming;
                    tool.input = None;
                });
            }
            UiChunk::ToolInputDelta {
                tool_call_id,
                input_text_delta,
            } => {
                let buffer = self.tool_inputs.get_mut(tool_call_id).ok_or_else(|| {
                    BraidError::InvalidState(format!(
                        "tool input delta for {tool_call_id} before tool-input-start"
                    ))
                })?;
                buffer.push_str(input_text_delta);
                let partial = parse_partial(buffer).into_value();
                let tool = self.existing_tool(tool_call_id)?;
                tool.input = partial;
            }
            UiChunk::ToolInputAvailable {
                tool_call_id,
                tool_name,
                input,
            } => {
                self.tool_inputs.remove(tool_call_id);
                self.upsert_tool(tool_call_id, tool_name, |tool| {
                    tool.state = ToolInvocationState::InputAvailable;
                    tool.input = Some(input.clone());
                });
            }
            UiChunk::ToolInputError {
                tool_call_id,
                tool_name,
                input,
                error_text,
            } => {
                self.tool_inputs.remove(tool_call_id);
                self.upsert_tool(tool_call_id, tool_name, |tool| {
                    tool.state = ToolInvocationState::OutputError;
                    tool.input = Some(input.clone());
                    tool.error_text = Some(error_text.clone());
                });
            }
            UiChunk::ToolApprovalRequest {
                approval_id,
                tool_call_id,
            } => {
                let tool = self.existing_tool(tool_call_id)?;
                tool.state = ToolInvocationState::AwaitingApproval;
                tool.approval = Some(UiApproval {
                    id: approval_id.clone(),
                    approved: None,
                    reason: None,
                });
            }
            UiChunk::ToolOutputAvailable {
                tool_call_id,
                output,
                preliminary,
            } => {
                let tool = self.existing_tool(tool_call_id)?;
                tool.state = ToolInvocationState::OutputAvailable;
                tool.output = Some(output.clone());
                tool.preliminary = *preliminary;
            }
            UiChunk::ToolOutputError {
                tool_call_id,
                error_text,
            } => {
                let tool = self.existing_tool(tool_call_id)?;
                tool.state = ToolInvocationState::OutputError;
                tool.error_text = Some(error_text.clone());
            }
            UiChunk::ToolOutputDenied { tool_call_id } => {
                let tool = self.existing_tool(tool_call_id)?;
                tool.state = ToolInvocationState::Denied;
            }
            UiChunk::SourceUrl {
                source_id,
                url,
                title,
            } => self.message.parts.push(UiPart::SourceUrl {
                source_id: source_id.clone(),
                url: url.clone(),
                title: title.clone(),
            }),
            UiChunk::SourceDocument {
                source_id,
                media_type,
                title,
                filename,
            } => self.message.parts.push(UiPart::SourceDocument {
                source_id: source_id.clone(),
                media_type: media_type.clone(),
                title: title.clone(),
                filename: filename.clone(),
            }),
            UiChunk::File { media_type, url } => self.message.parts.push(UiPart::File {
                media_type: media_type.clone(),
                url: url.clone(),
                filename: None,
            }),
        }
        Ok(())
    }

    fn active_part(&mut self, kind: Active, id: &str) -> Result<&mut UiPart, BraidError> {
        let active = match kind {
            Active::Text => &self.active_text,
            Active::Reasoning => &self.active_reasoning,
        };
        active
            .get(id)
            .and_then(|&index| self.message.parts.get_mut(index))
            .ok_or_else(|| BraidError::InvalidState(format!("no active {kind} part {id}")))
    }

    fn existing_tool(&mut self, tool_call_id: &str) -> Result<&mut UiToolPart, BraidError> {
        self.message.tool_part_mut(tool_call_id).ok_or_else(|| {
            BraidError::InvalidState(format!("no tool invocation for {tool_call_id}"))
        })
    }

    fn upsert_tool(
        &mut self,
        tool_call_id: &str,
        tool_name: &str,
        update: impl FnOnce(&mut UiToolPart),
    ) {
        if let Some(tool) = self.message.tool_part_mut(tool_call_id) {
            update(tool);
            return;
        }
        let mut tool = UiToolPart::new(tool_call_id, tool_name, ToolInvocationState::InputStreaming);
        update(&mut tool);
        self.message.parts.push(UiPart::Tool(tool));
    }
}

#[derive(Debug, Clone, Copy, strum::Display)]
#[strum(serialize_all = "lowercase")]
enum Active {
    Text,
    Reasoning,
}
