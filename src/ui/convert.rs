//! UI messages back to model messages.

use serde_json::Value;

use super::message::{UiMessage, UiPart, UiRole, UiToolPart};
use crate::tools::ToolInvocationState;
use crate::types::{ContentPart, ModelMessage, Role, ToolCall};

const DENIED_OUTPUT: &str = "Tool execution denied.";

/// Convert persisted UI messages into the conversation a run expects.
///
/// Assistant messages are split at step boundaries: each step becomes an
/// assistant message followed by a tool message with its results and any
/// approval responses. Tool parts still streaming their input are skipped.
pub fn convert_to_model_messages(messages: &[UiMessage]) -> Vec<ModelMessage> {
    let mut out = Vec::new();
    for message in messages {
        match message.role {
            UiRole::System => out.push(ModelMessage::system(message.text())),
            UiRole::User => {
                let content: Vec<ContentPart> = message
                    .parts
                    .iter()
                    .filter_map(|part| match part {
                        UiPart::Text { text, .. } => Some(ContentPart::text(text.clone())),
                        UiPart::File { media_type, url, .. } => Some(ContentPart::File {
                            media_type: media_type.clone(),
                            data: url.clone(),
                        }),
                        _ => None,
                    })
                    .collect();
                out.push(ModelMessage::new(Role::User, content));
            }
            UiRole::Assistant => {
                for block in message.parts.split(|part| matches!(part, UiPart::StepStart)) {
                    push_assistant_block(&mut out, block);
                }
            }
        }
    }
    out
}

fn push_assistant_block(out: &mut Vec<ModelMessage>, block: &[UiPart]) {
    let mut content = Vec::new();
    let mut tools: Vec<&UiToolPart> = Vec::new();
    for part in block {
        match part {
            UiPart::Text { text, .. } if !text.is_empty() => {
                content.push(ContentPart::text(text.clone()))
            }
            UiPart::Reasoning { text, .. } => {
                content.push(ContentPart::Reasoning { text: text.clone() })
            }
            UiPart::File { media_type, url, .. } => content.push(ContentPart::File {
                media_type: media_type.clone(),
                data: url.clone(),
            }),
            UiPart::Tool(tool) if tool.state != ToolInvocationState::InputStreaming => {
                content.push(ContentPart::ToolCall(ToolCall::new(
                    tool.tool_call_id.clone(),
                    tool.tool_name.clone(),
                    tool.input.clone().unwrap_or(Value::Null),
                )));
                if let Some(approval) = &tool.approval {
                    content.push(ContentPart::ToolApprovalRequest {
                        approval_id: approval.id.clone(),
                        tool_call_id: tool.tool_call_id.clone(),
                    });
                }
                tools.push(tool);
            }
            _ => {}
        }
    }
    if content.is_empty() {
        return;
    }
    out.push(ModelMessage::new(Role::Assistant, content));

    let results: Vec<ContentPart> = tools.into_iter().flat_map(tool_outputs).collect();
    if !results.is_empty() {
        out.push(ModelMessage::new(Role::Tool, results));
    }
}

fn tool_outputs(tool: &UiToolPart) -> Vec<ContentPart> {
    let mut outputs = Vec::new();
    if let Some(approval) = &tool.approval {
        if let Some(approved) = approval.approved {
            outputs.push(ContentPart::ToolApprovalResponse {
                approval_id: approval.id.clone(),
                approved,
                reason: approval.reason.clone(),
            });
        }
    }
    let result = match tool.state {
        ToolInvocationState::Denied => {
            let reason = tool
                .approval
                .as_ref()
                .and_then(|a| a.reason.clone())
                .unwrap_or_else(|| DENIED_OUTPUT.to_string());
            Some((Value::String(reason), true))
        }
        ToolInvocationState::OutputAvailable if !tool.preliminary => {
            Some((tool.output.clone().unwrap_or(Value::Null), false))
        }
        ToolInvocationState::OutputError => Some((
            Value::String(tool.error_text.clone().unwrap_or_default()),
            true,
        )),
        _ => None,
    };
    if let Some((output, is_error)) = result {
        outputs.push(ContentPart::ToolResult {
            tool_call_id: tool.tool_call_id.clone(),
            tool_name: tool.tool_name.clone(),
            output,
            is_error,
        });
    }
    outputs
}
