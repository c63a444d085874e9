//! Step records: one request/response round-trip with a model.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::generation::FinishReason;
use super::message::ModelMessage;
use super::stream::{GeneratedFile, ProviderMetadata, Source, ToolCall, ToolError, ToolResult};
use super::usage::Usage;

/// Why a step was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StepKind {
    /// First call of a run.
    Initial,
    /// Extends text the previous step truncated on `length`.
    Continue,
    /// Feeds tool results back to the model.
    ToolResult,
}

/// One immutable unit of a step's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentBlock {
    Text { id: String, text: String },
    Reasoning { id: String, text: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    ToolError(ToolError),
    File(GeneratedFile),
    Source(Source),
}

/// Which raw bodies to keep on sealed steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSettings {
    pub request_body: bool,
    pub response_body: bool,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            request_body: true,
            response_body: false,
        }
    }
}

/// A sealed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub index: usize,
    pub kind: StepKind,
    #[serde(default)]
    pub input_messages: Vec<ModelMessage>,
    pub content: Vec<ContentBlock>,
    pub finish_reason: FinishReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub provider_metadata: ProviderMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<serde_json::Value>,
    #[serde(default)]
    pub is_continued: bool,
}

impl Step {
    /// Concatenated text of this step.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Concatenated reasoning of this step.
    pub fn reasoning_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Reasoning { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn tool_results(&self) -> Vec<&ToolResult> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult(result) => Some(result),
                _ => None,
            })
            .collect()
    }

    pub fn tool_errors(&self) -> Vec<&ToolError> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolError(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    pub fn sources(&self) -> Vec<&Source> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Source(source) => Some(source),
                _ => None,
            })
            .collect()
    }

    pub fn files(&self) -> Vec<&GeneratedFile> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::File(file) => Some(file),
                _ => None,
            })
            .collect()
    }
}
