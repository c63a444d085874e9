//! UI chunks: the rendering-oriented projection of stream parts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{SourceKind, StreamPart, ToolErrorKind};

/// One event of a UI-message stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiChunk {
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_metadata: Option<Value>,
    },
    Finish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_metadata: Option<Value>,
    },
    Abort,
    StartStep,
    FinishStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    ToolInputStart {
        tool_call_id: String,
        tool_name: String,
    },
    ToolInputDelta {
        tool_call_id: String,
        input_text_delta: String,
    },
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    ToolInputError {
        tool_call_id: String,
        tool_name: String,
        input: Value,
        error_text: String,
    },
    ToolApprovalRequest {
        approval_id: String,
        tool_call_id: String,
    },
    ToolOutputAvailable {
        tool_call_id: String,
        output: Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        preliminary: bool,
    },
    ToolOutputError {
        tool_call_id: String,
        error_text: String,
    },
    ToolOutputDenied {
        tool_call_id: String,
    },
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
    },
    Error {
        error_text: String,
    },
}

impl UiChunk {
    /// `finish`, `abort` and `error` end a UI stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Abort | Self::Error { .. })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Finish { .. } => "finish",
            Self::Abort => "abort",
            Self::StartStep => "start-step",
            Self::FinishStep => "finish-step",
            Self::TextStart { .. } => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd { .. } => "text-end",
            Self::ReasoningStart { .. } => "reasoning-start",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ReasoningEnd { .. } => "reasoning-end",
            Self::ToolInputStart { .. } => "tool-input-start",
            Self::ToolInputDelta { .. } => "tool-input-delta",
            Self::ToolInputAvailable { .. } => "tool-input-available",
            Self::ToolInputError { .. } => "tool-input-error",
            Self::ToolApprovalRequest { .. } => "tool-approval-request",
            Self::ToolOutputAvailable { .. } => "tool-output-available",
            Self::ToolOutputError { .. } => "tool-output-error",
            Self::ToolOutputDenied { .. } => "tool-output-denied",
            Self::SourceUrl { .. } => "source-url",
            Self::SourceDocument { .. } => "source-document",
            Self::File { .. } => "file",
            Self::Error { .. } => "error",
        }
    }
}

/// Which optional parts reach the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiMapOptions {
    pub send_reasoning: bool,
    pub send_sources: bool,
}

impl Default for UiMapOptions {
    fn default() -> Self {
        Self {
            send_reasoning: true,
            send_sources: false,
        }
    }
}

/// Map one stream part to the UI chunks it produces. Pure; `raw` parts and
/// filtered kinds produce nothing.
pub fn to_ui_chunks(part: &StreamPart, options: &UiMapOptions) -> Vec<UiChunk> {
    let chunk = match part {
        StreamPart::TextStart { id } => UiChunk::TextStart { id: id.clone() },
        StreamPart::TextDelta { id, delta } => UiChunk::TextDelta {
            id: id.clone(),
            delta: delta.clone(),
        },
        StreamPart::TextEnd { id } => UiChunk::TextEnd { id: id.clone() },
        StreamPart::ReasoningStart { id } if options.send_reasoning => {
            UiChunk::ReasoningStart { id: id.clone() }
        }
        StreamPart::ReasoningDelta { id, delta } if options.send_reasoning => {
            UiChunk::ReasoningDelta {
                id: id.clone(),
                delta: delta.clone(),
            }
        }
        StreamPart::ReasoningEnd { id } if options.send_reasoning => {
            UiChunk::ReasoningEnd { id: id.clone() }
        }
        StreamPart::ToolInputStart {
            tool_call_id,
            tool_name,
        } => UiChunk::ToolInputStart {
            tool_call_id: tool_call_id.clone(),
            tool_name: tool_name.clone(),
        },
        StreamPart::ToolCallDelta {
            tool_call_id,
            input_text_delta,
            ..
        } => UiChunk::ToolInputDelta {
            tool_call_id: tool_call_id.clone(),
            input_text_delta: input_text_delta.clone(),
        },
        StreamPart::ToolCall(call) if call.invalid => UiChunk::ToolInputError {
            tool_call_id: call.tool_call_id.clone(),
            tool_name: call.tool_name.clone(),
            input: call.input.clone(),
            error_text: call.error.clone().unwrap_or_default(),
        },
        StreamPart::ToolCall(call) => UiChunk::ToolInputAvailable {
            tool_call_id: call.tool_call_id.clone(),
            tool_name: call.tool_name.clone(),
            input: call.input.clone(),
        },
        StreamPart::ToolApprovalRequest {
            approval_id,
            tool_call,
        } => UiChunk::ToolApprovalRequest {
            approval_id: approval_id.clone(),
            tool_call_id: tool_call.tool_call_id.clone(),
        },
        StreamPart::ToolResult(result) => UiChunk::ToolOutputAvailable {
            tool_call_id: result.tool_call_id.clone(),
            output: result.output.clone(),
            preliminary: result.preliminary,
        },
        StreamPart::ToolError(error) if error.kind == ToolErrorKind::Denied => {
            UiChunk::ToolOutputDenied {
                tool_call_id: error.tool_call_id.clone(),
            }
        }
        StreamPart::ToolError(error) => UiChunk::ToolOutputError {
            tool_call_id: error.tool_call_id.clone(),
            error_text: error.error.clone(),
        },
        StreamPart::Source(source) if options.send_sources => match source.kind {
            SourceKind::Url => UiChunk::SourceUrl {
                source_id: source.id.clone(),
                url: source.url.clone().unwrap_or_default(),
                title: source.title.clone(),
            },
            SourceKind::Document => UiChunk::SourceDocument {
                source_id: source.id.clone(),
                media_type: source.media_type.clone().unwrap_or_default(),
                title: source.title.clone().unwrap_or_default(),
                filename: source.filename.clone(),
            },
        },
        StreamPart::File(file) => UiChunk::File {
            media_type: file.media_type.clone(),
            url: file.data_url(),
        },
        StreamPart::StartStep { .. } => UiChunk::StartStep,
        StreamPart::FinishStep { .. } => UiChunk::FinishStep,
        StreamPart::Finish { .. } => UiChunk::Finish {
            message_metadata: None,
        },
        StreamPart::Error { .. } if part.is_abort() => UiChunk::Abort,
        StreamPart::Error { message, .. } => UiChunk::Error {
            error_text: message.clone(),
        },
        _ => return Vec::new(),
    };
    vec![chunk]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::AbortReason;
    use crate::types::{Source, ToolCall, ToolError};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn invalid_calls_become_input_errors() {
        let mut call = ToolCall::new("c1", "weather", json!({"city": 5}));
        call.invalid = true;
        call.error = Some("$.city: expected string".into());
        let chunks = to_ui_chunks(&StreamPart::ToolCall(call), &UiMapOptions::default());
        assert_eq!(
            chunks,
            vec![UiChunk::ToolInputError {
                tool_call_id: "c1".into(),
                tool_name: "weather".into(),
                input: json!({"city": 5}),
                error_text: "$.city: expected string".into(),
            }]
        );
    }

    #[test]
    fn denied_tools_and_aborts_have_their_own_chunks() {
        let denied = StreamPart::ToolError(ToolError {
            tool_call_id: "c1".into(),
            tool_name: "delete".into(),
            input: json!({}),
            kind: ToolErrorKind::Denied,
            error: "denied".into(),
        });
        let options = UiMapOptions::default();
        assert_eq!(
            to_ui_chunks(&denied, &options),
            vec![UiChunk::ToolOutputDenied {
                tool_call_id: "c1".into()
            }]
        );
        assert_eq!(
            to_ui_chunks(&StreamPart::aborted(AbortReason::User), &options),
            vec![UiChunk::Abort]
        );
    }

    #[test]
    fn options_filter_reasoning_and_sources() {
        let reasoning = StreamPart::ReasoningDelta {
            id: "r".into(),
            delta: "hmm".into(),
        };
        let source = StreamPart::Source(Source::url("s1", "https://example.com"));
        let quiet = UiMapOptions {
            send_reasoning: false,
            send_sources: false,
        };
        assert!(to_ui_chunks(&reasoning, &quiet).is_empty());
        assert!(to_ui_chunks(&source, &quiet).is_empty());

        let loud = UiMapOptions {
            send_reasoning: true,
            send_sources: true,
        };
        assert_eq!(to_ui_chunks(&reasoning, &loud).len(), 1);
        assert_eq!(to_ui_chunks(&source, &loud)[0].type_name(), "source-url");
        assert!(to_ui_chunks(&StreamPart::Raw { value: json!(1) }, &loud).is_empty());
    }

    #[test]
    fn chunks_serialize_with_kebab_tags() {
        let value = serde_json::to_value(UiChunk::ToolOutputAvailable {
            tool_call_id: "c1".into(),
            output: json!(3),
            preliminary: false,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"type": "tool-output-available", "tool_call_id": "c1", "output": 3})
        );
    }
}
