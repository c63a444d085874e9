use crate::types::{ContentBlock, ContentPart, ModelMessage, Role, Step};

/// The assistant message for a sealed step, if it produced anything to say.
pub(super) fn assistant_message(step: &Step, approval_requests: &[(String, String)]) -> Option<ModelMessage> {
    let mut content: Vec<ContentPart> = step
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text, .. } if !text.is_empty() => Some(ContentPart::text(text.clone())),
            ContentBlock::Reasoning { text, .. } => Some(ContentPart::Reasoning { text: text.clone() }),
            ContentBlock::ToolCall(call) => Some(ContentPart::ToolCall(call.clone())),
            ContentBlock::File(file) => Some(ContentPart::File {
                media_type: file.media_type.clone(),
                data: file.base64.clone(),
            }),
            _ => None,
        })
        .collect();
    content.extend(
        approval_requests
            .iter()
            .map(|(approval_id, tool_call_id)| ContentPart::ToolApprovalRequest {
                approval_id: approval_id.clone(),
                tool_call_id: tool_call_id.clone(),
            }),
    );
    if content.is_empty() {
        return None;
    }
    Some(ModelMessage::new(Role::Assistant, content))
}

/// A tool message carrying results and errors, in call order.
pub(super) fn tool_message(results: Vec<ContentPart>) -> Option<ModelMessage> {
    if results.is_empty() {
        return None;
    }
    Some(ModelMessage::new(Role::Tool, results))
}

/// Append a continue step's text to the last assistant message.
///
/// Returns false when there is no assistant message to extend.
pub(super) fn append_continuation(messages: &mut [ModelMessage], step: &Step) -> bool {
    let Some(last) = messages.iter_mut().rev().find(|m| m.role == Role::Assistant) else {
        return false;
    };
    last.append_text(&step.text());
    true
}
