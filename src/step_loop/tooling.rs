use std::sync::Arc;

use futures::{future, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::abort::AbortSignal;
use crate::error::ToolCallError;
use crate::tools::{PartWriter, Tool, ToolContext, ToolOutput, ToolSet};
use crate::types::{StreamPart, ToolCall, ToolError, ToolResult};

#[derive(Debug, Clone)]
pub(super) struct ToolExecutionOutcome {
    pub(super) call: ToolCall,
    pub(super) result: Result<Value, ToolCallError>,
}

/// Look up the tool for `call` and check its input. Marks the call invalid on failure.
pub(super) fn validate_call(
    tools: &ToolSet,
    call: &mut ToolCall,
) -> Result<Arc<dyn Tool>, ToolCallError> {
    let checked = match tools.get(&call.tool_name) {
        None => Err(ToolCallError::NotFound(call.tool_name.clone())),
        Some(tool) => tool
            .input_schema()
            .check(&call.input)
            .map(|()| tool.clone())
            .map_err(|e| ToolCallError::InputValidation(e.to_string())),
    };
    if let Err(err) = &checked {
        call.invalid = true;
        call.error = Some(err.to_string());
    }
    checked
}

pub(super) fn tool_result_part(call: &ToolCall, output: Value, preliminary: bool) -> StreamPart {
    StreamPart::ToolResult(ToolResult {
        tool_call_id: call.tool_call_id.clone(),
        tool_name: call.tool_name.clone(),
        input: call.input.clone(),
        output,
        preliminary,
    })
}

pub(super) fn tool_error_part(call: &ToolCall, error: &ToolCallError) -> StreamPart {
    StreamPart::ToolError(ToolError {
        tool_call_id: call.tool_call_id.clone(),
        tool_name: call.tool_name.clone(),
        input: call.input.clone(),
        kind: error.kind(),
        error: error.to_string(),
    })
}

/// Whether a part written by a tool may enter the run's stream. Step and run
/// boundaries belong to the step loop alone.
pub(super) fn is_nested_part_allowed(part: &StreamPart) -> bool {
    !matches!(
        part,
        StreamPart::StartStep { .. }
            | StreamPart::FinishStep { .. }
            | StreamPart::Finish { .. }
            | StreamPart::Error { .. }
    )
}

/// Every item but the last is forwarded as a preliminary result.
async fn drain_tool_stream(
    call: &ToolCall,
    mut stream: futures::stream::BoxStream<'static, Result<Value, ToolCallError>>,
    parts: &mpsc::UnboundedSender<StreamPart>,
) -> Result<Value, ToolCallError> {
    let mut last: Option<Value> = None;
    while let Some(item) = stream.next().await {
        let value = item?;
        if let Some(previous) = last.replace(value) {
            let _ = parts.send(tool_result_part(call, previous, true));
        }
    }
    last.ok_or_else(|| ToolCallError::execution("tool output stream ended without a value"))
}

pub(super) async fn execute_tool_call(
    tool: Arc<dyn Tool>,
    call: ToolCall,
    abort: AbortSignal,
    parts: mpsc::UnboundedSender<StreamPart>,
) -> ToolExecutionOutcome {
    let ctx = ToolContext {
        tool_call_id: call.tool_call_id.clone(),
        tool_name: call.tool_name.clone(),
        abort: abort.clone(),
        writer: PartWriter::new(parts.clone()),
    };
    let execution = async {
        match tool.execute(call.input.clone(), ctx).await? {
            ToolOutput::Value(value) => Ok(value),
            ToolOutput::Stream(stream) => drain_tool_stream(&call, stream, &parts).await,
        }
    };
    let result = tokio::select! {
        biased;
        _ = abort.cancelled() => Err(ToolCallError::execution("tool execution aborted")),
        result = execution => result,
    };
    if let Err(err) = &result {
        tracing::warn!(
            tool_call_id = %call.tool_call_id,
            tool_name = %call.tool_name,
            error = %err,
            "tool call failed"
        );
    }
    ToolExecutionOutcome { call, result }
}

/// Run all calls concurrently. Outcomes come back in the order of `calls`.
pub(super) async fn execute_parallel_tool_calls(
    calls: Vec<(Arc<dyn Tool>, ToolCall)>,
    abort: AbortSignal,
    parts: mpsc::UnboundedSender<StreamPart>,
) -> Vec<ToolExecutionOutcome> {
    let futures = calls
        .into_iter()
        .map(|(tool, call)| execute_tool_call(tool, call, abort.child(), parts.clone()));
    future::join_all(futures).await
}
