//! Convenience re-exports for common use.

pub use crate::abort::{AbortController, AbortReason, AbortSignal};
pub use crate::config::BraidConfig;
pub use crate::error::BraidError;
pub use crate::generation::{
    generate_object, generate_text, stream_array, stream_object, stream_text,
    GenerateObjectResult, GenerateTextResult, StreamObjectResult, StreamTextResult,
};
pub use crate::multiplex::{BufferConfig, OverflowPolicy};
pub use crate::provider::{ModelCapabilities, ModelProvider, ProviderRequest, ProviderStream};
pub use crate::step_loop::{
    ApprovalDecision, ApprovalHandler, ApprovalRequest, RunHandle, RunRequest, StepOverrides,
};
pub use crate::stop::{has_tool_call, step_count_is, text_matches, StopCondition};
pub use crate::tools::{AgentTool, JsonSchema, Schema, Tool, ToolSet, TypedSchema};
pub use crate::types::{
    ContentPart, FinishReason, GenerationSettings, ModelMessage, Role, Run, RunStatus, Step,
    StreamPart, ToolCall, ToolChoice, ToolResult, Usage,
};
pub use crate::ui::{UiChunk, UiMessage, UiStreamOptions};
