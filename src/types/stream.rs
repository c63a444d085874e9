//! Stream part types: the unit of data flowing through a run.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::generation::FinishReason;
use super::usage::Usage;
use crate::abort::AbortReason;
use crate::error::{BraidError, ErrorCategory};

/// Opaque provider-specific metadata.
pub type ProviderMetadata = serde_json::Map<String, serde_json::Value>;

/// One discrete event in a run's output stream.
///
/// Parts of one logical entity arrive in order: zero or more deltas, then one
/// terminal part. A stream ends with exactly one `finish` or `error` part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamPart {
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
    ToolCallDelta {
        tool_call_id: String,
        tool_name: String,
        input_text_delta: String,
    },
    ToolCall(ToolCall),
    ToolApprovalRequest {
        approval_id: String,
        tool_call: ToolCall,
    },
    ToolResult(ToolResult),
    ToolError(ToolError),
    Source(Source),
    File(GeneratedFile),
    StartStep {
        index: usize,
    },
    FinishStep {
        finish_reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        provider_metadata: ProviderMetadata,
        #[serde(default)]
        is_continued: bool,
    },
    Finish {
        finish_reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_usage: Option<Usage>,
    },
    Error {
        category: ErrorCategory,
        message: String,
    },
    Raw {
        value: serde_json::Value,
    },
}

impl StreamPart {
    /// `finish` and `error` end a stream; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }

    /// The terminal part for a cancelled run.
    pub fn aborted(reason: AbortReason) -> Self {
        Self::from_error(&BraidError::Aborted { reason })
    }

    /// The terminal part for a failed run.
    pub fn from_error(err: &BraidError) -> Self {
        Self::Error {
            category: err.category(),
            message: err.to_string(),
        }
    }

    /// Whether this is an `error` part caused by cancellation.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            Self::Error {
                category: ErrorCategory::Aborted,
                ..
            }
        )
    }

    /// Step-level finish marker with no metadata.
    pub fn finish_step(finish_reason: FinishReason, usage: Option<Usage>) -> Self {
        Self::FinishStep {
            finish_reason,
            usage,
            provider_metadata: ProviderMetadata::new(),
            is_continued: false,
        }
    }

    pub fn text_delta(id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::TextDelta {
            id: id.into(),
            delta: delta.into(),
        }
    }

    /// Discriminator as it appears on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TextStart { .. } => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd { .. } => "text-end",
            Self::ReasoningStart { .. } => "reasoning-start",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ReasoningEnd { .. } => "reasoning-end",
            Self::ToolInputStart { .. } => "tool-input-start",
            Self::ToolCallDelta { .. } => "tool-call-delta",
            Self::ToolCall(_) => "tool-call",
            Self::ToolApprovalRequest { .. } => "tool-approval-request",
            Self::ToolResult(_) => "tool-result",
            Self::ToolError(_) => "tool-error",
            Self::Source(_) => "source",
            Self::File(_) => "file",
            Self::StartStep { .. } => "start-step",
            Self::FinishStep { .. } => "finish-step",
            Self::Finish { .. } => "finish",
            Self::Error { .. } => "error",
            Self::Raw { .. } => "raw",
        }
    }
}

/// A complete tool call emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    /// Set when the input failed validation or the tool is unknown.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub invalid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCall {
    pub fn new(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input,
            invalid: false,
            error: None,
        }
    }
}

/// Output of a successful tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    /// Intermediate output of a streaming tool; a final result follows.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub preliminary: bool,
}

/// Classification of a captured tool failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolErrorKind {
    InputValidation,
    Execution,
    NotFound,
    Denied,
}

/// A tool failure captured as content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub kind: ToolErrorKind,
    pub error: String,
}

/// Kind of cited source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Url,
    Document,
}

/// A source cited by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl Source {
    pub fn url(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: SourceKind::Url,
            url: Some(url.into()),
            title: None,
            media_type: None,
            filename: None,
        }
    }
}

/// A file produced by the model, carried as base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub media_type: String,
    pub base64: String,
}

impl GeneratedFile {
    pub fn from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Decode the file contents.
    pub fn bytes(&self) -> Result<Vec<u8>, BraidError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.base64)
            .map_err(|e| BraidError::Stream(format!("invalid base64 file data: {e}")))
    }

    /// The file as a `data:` URL.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parts_carry_a_type_discriminator() {
        let part = StreamPart::text_delta("t1", "Hi");
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value, json!({"type": "text-delta", "id": "t1", "delta": "Hi"}));
        assert_eq!(part.type_name(), "text-delta");
    }

    #[test]
    fn newtype_parts_flatten_their_payload() {
        let part = StreamPart::ToolCall(ToolCall::new("c1", "weather", json!({"city": "Oslo"})));
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "tool-call");
        assert_eq!(value["tool_call_id"], "c1");
        assert!(value.get("invalid").is_none());
        let back: StreamPart = serde_json::from_value(value).unwrap();
        assert_eq!(back, part);
    }

    #[test]
    fn abort_parts_are_terminal_and_recognizable() {
        let part = StreamPart::aborted(AbortReason::User);
        assert!(part.is_terminal());
        assert!(part.is_abort());
        assert!(!StreamPart::from_error(&BraidError::Stream("x".into())).is_abort());
    }

    #[test]
    fn generated_file_decodes() {
        let file = GeneratedFile::from_bytes("text/plain", b"hello");
        assert_eq!(file.bytes().unwrap(), b"hello");
        assert_eq!(file.data_url(), "data:text/plain;base64,aGVsbG8=");
    }
}
