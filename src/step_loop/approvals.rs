//! Tool approval requests and decisions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::types::{ContentPart, ModelMessage, ToolCall};

/// A tool call waiting for a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approval_id: String,
    pub tool_call: ToolCall,
}

/// Decision for one approval request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Deny {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approve)
    }
}

/// Async approval handler callback. The run pauses until it resolves.
pub type ApprovalHandler =
    Arc<dyn Fn(ApprovalRequest) -> BoxFuture<'static, ApprovalDecision> + Send + Sync>;

/// An approval answered in the caller's messages whose call has no result yet.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct AnsweredApproval {
    pub(super) approval_id: String,
    pub(super) call: ToolCall,
    pub(super) decision: ApprovalDecision,
}

/// Match approval responses in `messages` with the requests and calls they answer.
///
/// Responses to unknown approvals, or to calls that already have a result, are
/// skipped.
pub(super) fn collect_approval_responses(messages: &[ModelMessage]) -> Vec<AnsweredApproval> {
    let mut requests: HashMap<&str, &str> = HashMap::new();
    let mut calls: HashMap<&str, &ToolCall> = HashMap::new();
    let mut answered: HashSet<&str> = HashSet::new();

    for part in messages.iter().flat_map(|m| m.content.iter()) {
        match part {
            ContentPart::ToolApprovalRequest {
                approval_id,
                tool_call_id,
            } => {
                requests.insert(approval_id.as_str(), tool_call_id.as_str());
            }
            ContentPart::ToolCall(call) => {
                calls.insert(call.tool_call_id.as_str(), call);
            }
            ContentPart::ToolResult { tool_call_id, .. } => {
                answered.insert(tool_call_id.as_str());
            }
            _ => {}
        }
    }

    let mut resolved = Vec::new();
    for part in messages.iter().flat_map(|m| m.content.iter()) {
        let ContentPart::ToolApprovalResponse {
            approval_id,
            approved,
            reason,
        } = part
        else {
            continue;
        };
        let Some(call) = requests
            .get(approval_id.as_str())
            .and_then(|call_id| calls.get(call_id))
        else {
            tracing::warn!(%approval_id, "approval response does not match any request");
            continue;
        };
        if answered.contains(call.tool_call_id.as_str()) {
            continue;
        }
        let decision = if *approved {
            ApprovalDecision::Approve
        } else {
            ApprovalDecision::Deny {
                reason: reason.clone(),
            }
        };
        resolved.push(AnsweredApproval {
            approval_id: approval_id.clone(),
            call: (*call).clone(),
            decision,
        });
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use serde_json::json;

    fn assistant_with_request(call_id: &str, approval_id: &str) -> ModelMessage {
        ModelMessage::new(
            Role::Assistant,
            vec![
                ContentPart::ToolCall(ToolCall::new(call_id, "delete", json!({"path": "/tmp/x"}))),
                ContentPart::ToolApprovalRequest {
                    approval_id: approval_id.into(),
                    tool_call_id: call_id.into(),
                },
            ],
        )
    }

    #[test]
    fn pairs_responses_with_their_calls() {
        let messages = vec![
            ModelMessage::user("clean up"),
            assistant_with_request("c1", "a1"),
            ModelMessage::approval_response("a1", false, Some("no".into())),
        ];
        let resolved = collect_approval_responses(&messages);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].call.tool_call_id, "c1");
        assert_eq!(
            resolved[0].decision,
            ApprovalDecision::Deny {
                reason: Some("no".into())
            }
        );
    }

    #[test]
    fn skips_calls_that_already_have_results() {
        let messages = vec![
            assistant_with_request("c1", "a1"),
            ModelMessage::approval_response("a1", true, None),
            ModelMessage::new(
                Role::Tool,
                vec![ContentPart::ToolResult {
                    tool_call_id: "c1".into(),
                    tool_name: "delete".into(),
                    output: json!("done"),
                    is_error: false,
                }],
            ),
            ModelMessage::approval_response("unknown", true, None),
        ];
        assert!(collect_approval_responses(&messages).is_empty());
    }
}
