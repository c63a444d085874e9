use std::sync::Arc;

use futures::StreamExt;

use super::{Interrupt, RunContext};
use crate::step_loop::prepare::{RepairRequest, StepPlan};
use crate::error::{BraidError, ToolCallError};
use crate::provider::{ProviderRequest, ProviderStream};
use crate::step_loop::events::RunEventPayload;
use crate::step_loop::tooling::validate_call;
use crate::tools::Tool;
use crate::types::{FinishReason, ProviderMetadata, StreamPart, ToolCall, Usage};
use crate::util::timeout::with_optional_timeout;

/// A tool call as emitted by the model, with the outcome of its lookup and
/// input validation.
#[derive(Clone)]
pub(in crate::step_loop) struct CheckedCall {
    pub(in crate::step_loop) call: ToolCall,
    pub(in crate::step_loop) tool: Result<Arc<dyn Tool>, ToolCallError>,
}

/// What one provider call produced, besides the parts already published.
pub(in crate::step_loop) struct ModelStep {
    pub(in crate::step_loop) finish_reason: FinishReason,
    pub(in crate::step_loop) usage: Option<Usage>,
    pub(in crate::step_loop) provider_metadata: ProviderMetadata,
    pub(in crate::step_loop) calls: Vec<CheckedCall>,
    pub(in crate::step_loop) request_body: Option<serde_json::Value>,
    /// Raw provider chunks, kept only when response bodies are retained.
    pub(in crate::step_loop) raw: Vec<serde_json::Value>,
}

pub(in crate::step_loop) async fn run_model_phase(
    ctx: &mut RunContext,
    plan: &StepPlan,
) -> Result<ModelStep, Interrupt> {
    let request = ProviderRequest {
        messages: plan.messages.clone(),
        settings: plan.settings.clone(),
        tools: (!plan.tools.is_empty()).then(|| plan.tools.clone()),
        tool_choice: plan.tool_choice.clone(),
        response_format: plan.settings.response_format.clone(),
    };
    let provider = plan.provider.clone();
    let call_timeout = ctx.request.call_timeout;

    let ProviderStream {
        mut parts,
        request_body,
    } = ctx
        .request
        .retry
        .execute_with_abort(&ctx.abort, || {
            with_optional_timeout(call_timeout, provider.stream(&request))
        })
        .await?;

    let mut step = ModelStep {
        finish_reason: FinishReason::Unknown,
        usage: None,
        provider_metadata: ProviderMetadata::new(),
        calls: Vec::new(),
        request_body,
        raw: Vec::new(),
    };
    let mut finished = false;

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.abort.cancelled() => return Err(ctx.aborted()),
            next = with_optional_timeout(call_timeout, async { Ok(parts.next().await) }) => next?,
        };
        let Some(item) = next else {
            break;
        };
        let part = item.map_err(Interrupt::from)?;

        match part {
            StreamPart::StartStep { .. } | StreamPart::Finish { .. } => {
                tracing::debug!(part = part.type_name(), "ignoring provider run boundary");
            }
            StreamPart::Error { message, .. } => {
                return Err(Interrupt::Failed(BraidError::provider(
                    provider.provider_name(),
                    None,
                    message,
                )));
            }
            StreamPart::FinishStep {
                finish_reason,
                usage,
                provider_metadata,
                ..
            } => {
                step.finish_reason = finish_reason;
                step.usage = usage;
                step.provider_metadata = provider_metadata;
                finished = true;
                break;
            }
            StreamPart::Raw { value } => {
                if ctx.request.retention.response_body {
                    step.raw.push(value.clone());
                }
                if ctx.request.include_raw {
                    ctx.publish(StreamPart::Raw { value }).await?;
                }
            }
            StreamPart::ToolCall(call) => {
                let held = ctx.continuation.rule_out();
                ctx.publish_all(held).await?;
                let checked = check_call(ctx, plan, call).await?;
                ctx.emitter.emit(RunEventPayload::ToolCallStarted {
                    call: checked.call.clone(),
                });
                ctx.publish(StreamPart::ToolCall(checked.call.clone())).await?;
                step.calls.push(checked);
            }
            part @ (StreamPart::ToolInputStart { .. } | StreamPart::ToolCallDelta { .. }) => {
                let held = ctx.continuation.rule_out();
                ctx.publish_all(held).await?;
                ctx.publish(part).await?;
            }
            part @ (StreamPart::TextStart { .. }
            | StreamPart::TextDelta { .. }
            | StreamPart::TextEnd { .. }) => {
                let rewritten = ctx.continuation.filter(part);
                ctx.publish_all(rewritten).await?;
            }
            other => ctx.publish(other).await?,
        }
    }

    if !finished {
        tracing::warn!(
            run_id = %ctx.request.run_id,
            provider = provider.provider_name(),
            "provider stream ended without finish-step"
        );
    }
    Ok(step)
}

/// Validate `call`, giving the repair hook one chance to fix a failure.
async fn check_call(
    ctx: &RunContext,
    plan: &StepPlan,
    call: ToolCall,
) -> Result<CheckedCall, Interrupt> {
    let mut checked = call.clone();
    let error = match validate_call(&ctx.request.tools, &mut checked) {
        Ok(tool) => {
            return Ok(CheckedCall {
                call: checked,
                tool: Ok(tool),
            })
        }
        Err(error) => error,
    };
    let Some(repair) = ctx.request.repair_tool_call.clone() else {
        return Ok(CheckedCall {
            call: checked,
            tool: Err(error),
        });
    };

    let request = RepairRequest {
        tool_call: call,
        error: error.clone(),
        tools: plan.tools.clone(),
        messages: plan.messages.clone(),
    };
    let repaired = tokio::select! {
        biased;
        _ = ctx.abort.cancelled() => return Err(ctx.aborted()),
        repaired = repair(request) => repaired,
    };
    match repaired {
        Ok(Some(mut fixed)) => {
            fixed.tool_call_id = checked.tool_call_id.clone();
            fixed.invalid = false;
            fixed.error = None;
            let tool = validate_call(&ctx.request.tools, &mut fixed);
            tracing::debug!(
                run_id = %ctx.request.run_id,
                tool_call_id = %fixed.tool_call_id,
                tool = %fixed.tool_name,
                valid = tool.is_ok(),
                "tool call repaired"
            );
            Ok(CheckedCall { call: fixed, tool })
        }
        Ok(None) => Ok(CheckedCall {
            call: checked,
            tool: Err(error),
        }),
        Err(repair_error) => {
            checked.error = Some(repair_error.to_string());
            Ok(CheckedCall {
                call: checked,
                tool: Err(repair_error),
            })
        }
    }
}
