use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};

use super::continuation::Continuation;
use super::events::{RunEventEmitter, RunEventPayload, RunLifecycle};
use super::limits::StepLimits;
use super::messages::{append_continuation, assistant_message, tool_message};
use super::prepare::{PrepareStepContext, StepOverrides, StepPlan};
use super::{RunRequest, RunState};
use crate::abort::{AbortReason, AbortSignal};
use crate::aggregate::ContentAggregator;
use crate::error::BraidError;
use crate::stop::any_should_stop;
use crate::types::{
    FinishReason, ModelMessage, PendingApproval, RunStatus, Step, StepKind, StreamPart,
};
use crate::util::lock;

mod model_phase;
mod tool_phase;

use model_phase::{run_model_phase, ModelStep};
use tool_phase::{resolve_answered_approvals, run_tool_phase, ToolPhaseOutcome};

/// Why the loop stopped early.
#[derive(Debug)]
pub(super) enum Interrupt {
    Aborted(AbortReason),
    Failed(BraidError),
}

impl From<BraidError> for Interrupt {
    fn from(err: BraidError) -> Self {
        match err {
            BraidError::Aborted { reason } => Self::Aborted(reason),
            other => Self::Failed(other),
        }
    }
}

enum RunEnd {
    Done,
    AwaitingApproval(Vec<PendingApproval>),
    Interrupted(Interrupt),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextStep {
    Done,
    AwaitingApproval,
    Call(StepKind),
}

pub(crate) struct RunContext {
    pub(super) request: RunRequest,
    pub(super) limits: StepLimits,
    pub(super) emitter: RunEventEmitter,
    pub(super) abort: AbortSignal,
    pub(super) aggregator: ContentAggregator,
    pub(super) continuation: Continuation,
    /// Conversation sent to the model on the next call.
    pub(super) messages: Vec<ModelMessage>,
    /// Messages this run added to the conversation.
    pub(super) response_messages: Vec<ModelMessage>,
    tx: mpsc::Sender<StreamPart>,
    state: Arc<Mutex<RunState>>,
    status: watch::Sender<RunStatus>,
}

impl RunContext {
    pub(crate) fn new(
        request: RunRequest,
        abort: AbortSignal,
        tx: mpsc::Sender<StreamPart>,
        state: Arc<Mutex<RunState>>,
        status: watch::Sender<RunStatus>,
    ) -> Self {
        Self {
            limits: StepLimits::from_request(&request),
            emitter: RunEventEmitter::new(request.run_id, request.events.clone()),
            continuation: Continuation::new(request.continuation),
            messages: request.messages.clone(),
            response_messages: Vec::new(),
            aggregator: ContentAggregator::new(),
            request,
            abort,
            tx,
            state,
            status,
        }
    }

    pub(super) fn aborted(&self) -> Interrupt {
        Interrupt::Aborted(self.abort.reason().unwrap_or(AbortReason::User))
    }

    /// Record `part` and hand it to the consumer.
    pub(super) async fn publish(&mut self, part: StreamPart) -> Result<(), Interrupt> {
        if let Err(err) = self.aggregator.apply(&part) {
            tracing::warn!(run_id = %self.request.run_id, error = %err, "aggregator rejected part");
        }
        let sent = tokio::select! {
            biased;
            _ = self.abort.cancelled() => return Err(self.aborted()),
            sent = self.tx.send(part) => sent.is_ok(),
        };
        if !sent {
            tracing::debug!(run_id = %self.request.run_id, "stream consumer dropped, aborting run");
            self.abort.trigger(AbortReason::User);
            return Err(Interrupt::Aborted(AbortReason::User));
        }
        Ok(())
    }

    pub(super) async fn publish_all(&mut self, parts: Vec<StreamPart>) -> Result<(), Interrupt> {
        for part in parts {
            self.publish(part).await?;
        }
        Ok(())
    }

    fn push_messages(&mut self, messages: impl IntoIterator<Item = ModelMessage>) {
        for message in messages {
            self.messages.push(message.clone());
            self.response_messages.push(message);
        }
    }
}

/// Drive a run to completion. Runs on its own task.
pub(crate) async fn run(mut ctx: RunContext) {
    ctx.emitter.lifecycle(RunLifecycle::Started);
    tracing::debug!(
        run_id = %ctx.request.run_id,
        provider = ctx.request.provider.provider_name(),
        model = ctx.request.provider.model_id(),
        max_steps = ctx.limits.max_steps,
        tools = ctx.request.tools.len(),
        "braid run start"
    );
    let end = match drive(&mut ctx).await {
        Ok(end) => end,
        Err(interrupt) => RunEnd::Interrupted(interrupt),
    };
    close(&mut ctx, end).await;
}

async fn drive(ctx: &mut RunContext) -> Result<RunEnd, Interrupt> {
    if let Some(results) = resolve_answered_approvals(ctx).await? {
        ctx.push_messages(tool_message(results));
    }

    let mut index = 0;
    let mut kind = StepKind::Initial;
    loop {
        if ctx.abort.is_aborted() {
            return Err(ctx.aborted());
        }
        ctx.limits.check(index)?;

        let plan = plan_step(ctx, index).await?;
        let input_messages = plan.messages.clone();
        ctx.continuation.begin_step(kind == StepKind::Continue);
        ctx.emitter.emit(RunEventPayload::StepStarted { index, kind });
        ctx.publish(StreamPart::StartStep { index }).await?;

        let model = run_model_phase(ctx, &plan).await?;
        let tools = run_tool_phase(ctx, model.calls.clone()).await?;
        let next = decide_next(ctx, &model, &tools, kind).await;

        let held = if next == NextStep::Call(StepKind::Continue) {
            ctx.emitter
                .emit(RunEventPayload::ContinuationScheduled { index: index + 1 });
            ctx.continuation.carry_over()
        } else {
            ctx.continuation.finish()
        };
        ctx.publish_all(held).await?;
        ctx.publish(StreamPart::FinishStep {
            finish_reason: model.finish_reason,
            usage: model.usage.clone(),
            provider_metadata: model.provider_metadata.clone(),
            is_continued: next == NextStep::Call(StepKind::Continue),
        })
        .await?;

        let step = seal_step(ctx, &model, kind, input_messages)?;
        if kind == StepKind::Continue && append_continuation(&mut ctx.messages, &step) {
            append_continuation(&mut ctx.response_messages, &step);
        } else {
            ctx.push_messages(assistant_message(&step, &tools.approval_requests));
        }
        ctx.push_messages(tool_message(tools.results));

        {
            let mut state = lock(&ctx.state);
            if let Err(err) = state.run.push_step(step.clone()) {
                tracing::warn!(run_id = %ctx.request.run_id, error = %err, "step not recorded");
            }
            state.run.response_messages = ctx.response_messages.clone();
        }
        ctx.emitter.emit(RunEventPayload::StepFinished {
            index,
            finish_reason: step.finish_reason,
            usage: step.usage.clone(),
        });
        tracing::debug!(
            run_id = %ctx.request.run_id,
            step = index,
            kind = %kind,
            finish_reason = %step.finish_reason,
            tool_calls = model.calls.len(),
            "braid step finished"
        );

        match next {
            NextStep::Done => return Ok(RunEnd::Done),
            NextStep::AwaitingApproval => return Ok(RunEnd::AwaitingApproval(tools.pending)),
            NextStep::Call(next_kind) => kind = next_kind,
        }
        index += 1;
    }
}

/// Resolve the provider, prompt and tools for step `index`.
async fn plan_step(ctx: &RunContext, index: usize) -> Result<StepPlan, Interrupt> {
    let overrides = match ctx.request.prepare_step.clone() {
        Some(prepare) => {
            let context = PrepareStepContext {
                step_number: index,
                steps: ctx.aggregator.steps().to_vec(),
                messages: ctx.messages.clone(),
            };
            tokio::select! {
                biased;
                _ = ctx.abort.cancelled() => return Err(ctx.aborted()),
                overrides = prepare(context) => overrides?,
            }
        }
        None => StepOverrides::default(),
    };

    let active = overrides
        .active_tools
        .as_deref()
        .or(ctx.request.active_tools.as_deref());
    let tools = ctx.request.tools.active_definitions(active);
    let tool_choice = if tools.is_empty() {
        None
    } else {
        overrides
            .tool_choice
            .or_else(|| ctx.request.tool_choice.clone())
    };
    Ok(StepPlan {
        provider: overrides
            .provider
            .unwrap_or_else(|| ctx.request.provider.clone()),
        messages: overrides.messages.unwrap_or_else(|| ctx.messages.clone()),
        settings: overrides
            .settings
            .unwrap_or_else(|| ctx.request.settings.clone()),
        tools,
        tool_choice,
    })
}

async fn decide_next(
    ctx: &RunContext,
    model: &ModelStep,
    tools: &ToolPhaseOutcome,
    kind: StepKind,
) -> NextStep {
    if !tools.pending.is_empty() {
        return NextStep::AwaitingApproval;
    }
    let mut steps = ctx.aggregator.steps().to_vec();
    let mut preview = ctx.aggregator.preview_step(
        model.finish_reason,
        model.usage.clone(),
        model.provider_metadata.clone(),
    );
    preview.kind = kind;
    steps.push(preview);
    if any_should_stop(&ctx.request.stop_when, &steps).await {
        tracing::debug!(run_id = %ctx.request.run_id, steps = steps.len(), "stop condition met");
        return NextStep::Done;
    }
    if !model.calls.is_empty() {
        return NextStep::Call(StepKind::ToolResult);
    }
    if ctx.request.continuation && model.finish_reason == FinishReason::Length {
        return NextStep::Call(StepKind::Continue);
    }
    NextStep::Done
}

/// Attach run metadata to the step the aggregator just sealed.
fn seal_step(
    ctx: &mut RunContext,
    model: &ModelStep,
    kind: StepKind,
    input_messages: Vec<ModelMessage>,
) -> Result<Step, Interrupt> {
    let retention = ctx.request.retention;
    let Some(step) = ctx.aggregator.last_step_mut() else {
        return Err(Interrupt::Failed(BraidError::InvalidState(
            "finish-step did not seal a step".to_string(),
        )));
    };
    step.kind = kind;
    step.input_messages = input_messages;
    if retention.request_body {
        step.request_body = model.request_body.clone();
    }
    if retention.response_body && !model.raw.is_empty() {
        step.response_body = Some(serde_json::Value::Array(model.raw.clone()));
    }
    Ok(step.clone())
}

/// Record the terminal status, then publish the terminal part.
async fn close(ctx: &mut RunContext, end: RunEnd) {
    if matches!(end, RunEnd::Interrupted(Interrupt::Failed(_))) {
        let held = ctx.continuation.finish();
        for part in held {
            if ctx.publish(part).await.is_err() {
                break;
            }
        }
    }

    let (status, lifecycle, error) = match &end {
        RunEnd::Done => (RunStatus::Done, RunLifecycle::Completed, None),
        RunEnd::AwaitingApproval(_) => (
            RunStatus::AwaitingApproval,
            RunLifecycle::AwaitingApproval,
            None,
        ),
        RunEnd::Interrupted(Interrupt::Aborted(reason)) => (
            RunStatus::Aborted,
            RunLifecycle::Aborted { reason: *reason },
            Some(BraidError::Aborted { reason: *reason }),
        ),
        RunEnd::Interrupted(Interrupt::Failed(err)) => (
            RunStatus::Failed,
            RunLifecycle::Failed {
                error: err.to_string(),
            },
            Some(err.clone()),
        ),
    };

    let terminal = {
        let mut state = lock(&ctx.state);
        if let RunEnd::AwaitingApproval(pending) = &end {
            state.run.pending_approvals = pending.clone();
        }
        state.run.response_messages = ctx.response_messages.clone();
        if let Err(err) = state.run.finish(status) {
            tracing::warn!(run_id = %ctx.request.run_id, error = %err, "run already finished");
        }
        state.error = error.clone();
        match &error {
            Some(err) => StreamPart::from_error(err),
            None => StreamPart::Finish {
                finish_reason: state.run.finish_reason().unwrap_or(FinishReason::Unknown),
                total_usage: state.run.total_usage(),
            },
        }
    };

    if let Some(err) = &error {
        if !err.is_abort() {
            ctx.emitter.emit(RunEventPayload::Error {
                message: err.to_string(),
            });
        }
    }
    ctx.emitter.lifecycle(lifecycle);
    let _ = ctx.status.send(status);
    tracing::debug!(run_id = %ctx.request.run_id, status = %status, "braid run end");

    if let Err(err) = ctx.aggregator.apply(&terminal) {
        tracing::warn!(run_id = %ctx.request.run_id, error = %err, "aggregator rejected terminal part");
    }
    if status == RunStatus::Aborted {
        // The consumer side ends views on abort by itself.
        let _ = ctx.tx.try_send(terminal);
        return;
    }
    tokio::select! {
        biased;
        _ = ctx.abort.cancelled() => {}
        _ = ctx.tx.send(terminal) => {}
    }
}
