use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::model_phase::CheckedCall;
use super::{Interrupt, RunContext};
use crate::error::{BraidError, ToolCallError};
use crate::step_loop::approvals::{collect_approval_responses, ApprovalDecision, ApprovalRequest};
use crate::step_loop::events::RunEventPayload;
use crate::step_loop::tooling::{
    execute_parallel_tool_calls, is_nested_part_allowed, tool_error_part, tool_result_part,
    validate_call, ToolExecutionOutcome,
};
use crate::tools::{Tool, ToolInvocationState};
use crate::types::{ContentPart, PendingApproval, RunStatus, StreamPart, ToolCall};

pub(in crate::step_loop) struct ToolPhaseOutcome {
    /// Approvals nobody answered during the run.
    pub(in crate::step_loop) pending: Vec<PendingApproval>,
    /// `(approval_id, tool_call_id)` for every approval request emitted.
    pub(in crate::step_loop) approval_requests: Vec<(String, String)>,
    /// Tool results and errors in call order, ready for a tool message.
    pub(in crate::step_loop) results: Vec<ContentPart>,
}

enum Plan {
    Reject(ToolCallError),
    Execute(Arc<dyn Tool>),
    Pending,
}

enum ToolEvent {
    Aborted,
    Part(Option<StreamPart>),
    Done(Vec<ToolExecutionOutcome>),
}

#[derive(Default)]
struct Invocations {
    states: HashMap<String, ToolInvocationState>,
}

impl Invocations {
    fn state(&self, call: &ToolCall) -> ToolInvocationState {
        self.states
            .get(&call.tool_call_id)
            .copied()
            .unwrap_or(ToolInvocationState::InputAvailable)
    }

    fn advance(&mut self, call: &ToolCall, next: ToolInvocationState) {
        match self.state(call).transition(next) {
            Ok(state) => {
                self.states.insert(call.tool_call_id.clone(), state);
            }
            Err(err) => tracing::warn!(
                tool_call_id = %call.tool_call_id,
                error = %err,
                "unexpected tool invocation state change"
            ),
        }
    }
}

pub(in crate::step_loop) async fn run_tool_phase(
    ctx: &mut RunContext,
    calls: Vec<CheckedCall>,
) -> Result<ToolPhaseOutcome, Interrupt> {
    let mut outcome = ToolPhaseOutcome {
        pending: Vec::new(),
        approval_requests: Vec::new(),
        results: Vec::new(),
    };
    if calls.is_empty() {
        return Ok(outcome);
    }

    let mut invocations = Invocations::default();
    let mut plans = Vec::with_capacity(calls.len());
    for CheckedCall { call, tool } in calls {
        let plan = match tool {
            Err(err) => Plan::Reject(err),
            Ok(tool) if tool.needs_approval(&call.input) => {
                let approval_id = format!("approval-{}", Uuid::new_v4());
                invocations.advance(&call, ToolInvocationState::AwaitingApproval);
                ctx.emitter.emit(RunEventPayload::ApprovalRequired {
                    approval_id: approval_id.clone(),
                    call: call.clone(),
                });
                ctx.publish(StreamPart::ToolApprovalRequest {
                    approval_id: approval_id.clone(),
                    tool_call: call.clone(),
                })
                .await?;
                outcome
                    .approval_requests
                    .push((approval_id.clone(), call.tool_call_id.clone()));

                match ctx.request.approval_handler.clone() {
                    Some(handler) => {
                        let request = ApprovalRequest {
                            approval_id,
                            tool_call: call.clone(),
                        };
                        let _ = ctx.status.send(RunStatus::AwaitingApproval);
                        let decision = tokio::select! {
                            biased;
                            _ = ctx.abort.cancelled() => return Err(ctx.aborted()),
                            decision = handler(request) => decision,
                        };
                        let _ = ctx.status.send(RunStatus::Running);
                        match decision {
                            ApprovalDecision::Approve => {
                                invocations.advance(&call, ToolInvocationState::Approved);
                                Plan::Execute(tool)
                            }
                            ApprovalDecision::Deny { reason } => {
                                invocations.advance(&call, ToolInvocationState::Denied);
                                Plan::Reject(ToolCallError::Denied { reason })
                            }
                        }
                    }
                    None => {
                        outcome.pending.push(PendingApproval {
                            approval_id,
                            tool_call: call.clone(),
                        });
                        Plan::Pending
                    }
                }
            }
            Ok(tool) => Plan::Execute(tool),
        };
        plans.push((call, plan));
    }

    outcome.results = settle(ctx, plans, &mut invocations).await?;
    Ok(outcome)
}

/// Execute or reject the calls that approval responses in the caller's
/// messages answered, before the first model call.
pub(in crate::step_loop) async fn resolve_answered_approvals(
    ctx: &mut RunContext,
) -> Result<Option<Vec<ContentPart>>, Interrupt> {
    let answered = collect_approval_responses(&ctx.messages);
    if answered.is_empty() {
        return Ok(None);
    }

    let mut invocations = Invocations::default();
    let mut plans = Vec::with_capacity(answered.len());
    for answer in answered {
        let mut call = answer.call;
        tracing::debug!(
            run_id = %ctx.request.run_id,
            approval_id = %answer.approval_id,
            approved = answer.decision.is_approved(),
            "resolving answered approval"
        );
        invocations
            .states
            .insert(call.tool_call_id.clone(), ToolInvocationState::AwaitingApproval);
        let plan = match answer.decision {
            ApprovalDecision::Approve => {
                invocations.advance(&call, ToolInvocationState::Approved);
                match validate_call(&ctx.request.tools, &mut call) {
                    Ok(tool) => Plan::Execute(tool),
                    Err(err) => Plan::Reject(err),
                }
            }
            ApprovalDecision::Deny { reason } => {
                invocations.advance(&call, ToolInvocationState::Denied);
                Plan::Reject(ToolCallError::Denied { reason })
            }
        };
        plans.push((call, plan));
    }

    settle(ctx, plans, &mut invocations).await.map(Some)
}

/// Run the executable calls concurrently, then publish every outcome in call order.
async fn settle(
    ctx: &mut RunContext,
    plans: Vec<(ToolCall, Plan)>,
    invocations: &mut Invocations,
) -> Result<Vec<ContentPart>, Interrupt> {
    let executable: Vec<(Arc<dyn Tool>, ToolCall)> = plans
        .iter()
        .filter_map(|(call, plan)| match plan {
            Plan::Execute(tool) => Some((tool.clone(), call.clone())),
            _ => None,
        })
        .collect();
    for (_, call) in &executable {
        invocations.advance(call, ToolInvocationState::Executing);
    }
    let mut outcomes = execute_with_nested_parts(ctx, executable).await?.into_iter();

    let mut results = Vec::new();
    for (call, plan) in plans {
        let (result, fatal) = match plan {
            Plan::Pending => continue,
            Plan::Reject(err) => (Err(err), false),
            Plan::Execute(tool) => match outcomes.next() {
                Some(outcome) => (outcome.result, tool.is_fatal()),
                None => continue,
            },
        };

        match result {
            Ok(output) => {
                invocations.advance(&call, ToolInvocationState::OutputAvailable);
                ctx.publish(tool_result_part(&call, output.clone(), false))
                    .await?;
                results.push(ContentPart::ToolResult {
                    tool_call_id: call.tool_call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    output,
                    is_error: false,
                });
            }
            Err(err) => {
                if !matches!(err, ToolCallError::Denied { .. }) {
                    invocations.advance(&call, ToolInvocationState::OutputError);
                }
                ctx.publish(tool_error_part(&call, &err)).await?;
                if fatal {
                    return Err(Interrupt::Failed(BraidError::ToolExecution {
                        tool_name: call.tool_name.clone(),
                        message: err.to_string(),
                    }));
                }
                results.push(ContentPart::ToolResult {
                    tool_call_id: call.tool_call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    output: Value::String(err.to_string()),
                    is_error: true,
                });
            }
        }
        ctx.emitter.emit(RunEventPayload::ToolCallCompleted {
            tool_call_id: call.tool_call_id.clone(),
            tool_name: call.tool_name.clone(),
            state: invocations.state(&call),
        });
    }
    Ok(results)
}

/// Execute while forwarding preliminary results and nested parts as they arrive.
async fn execute_with_nested_parts(
    ctx: &mut RunContext,
    executable: Vec<(Arc<dyn Tool>, ToolCall)>,
) -> Result<Vec<ToolExecutionOutcome>, Interrupt> {
    if executable.is_empty() {
        return Ok(Vec::new());
    }
    let (parts_tx, mut parts_rx) = mpsc::unbounded_channel();
    let execution = execute_parallel_tool_calls(executable, ctx.abort.clone(), parts_tx);
    tokio::pin!(execution);

    let outcomes = loop {
        let event = tokio::select! {
            biased;
            _ = ctx.abort.cancelled() => ToolEvent::Aborted,
            part = parts_rx.recv() => ToolEvent::Part(part),
            outcomes = &mut execution => ToolEvent::Done(outcomes),
        };
        match event {
            ToolEvent::Aborted => return Err(ctx.aborted()),
            ToolEvent::Part(Some(part)) => forward_nested(ctx, part).await?,
            ToolEvent::Part(None) => break (&mut execution).await,
            ToolEvent::Done(outcomes) => break outcomes,
        }
    };
    while let Ok(part) = parts_rx.try_recv() {
        forward_nested(ctx, part).await?;
    }
    Ok(outcomes)
}

async fn forward_nested(ctx: &mut RunContext, part: StreamPart) -> Result<(), Interrupt> {
    if is_nested_part_allowed(&part) {
        ctx.publish(part).await
    } else {
        tracing::warn!(
            run_id = %ctx.request.run_id,
            part = part.type_name(),
            "dropping step boundary written by a tool"
        );
        Ok(())
    }
}
