//! Tool approval: handler decisions, pausing runs, and resuming them.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use braid::generation::{generate_text, stream_text};
use braid::prelude::*;
use braid::tools::ToolInvocationState;
use braid::types::{Role, ToolErrorKind};
use braid::ui::{convert_to_model_messages, UiFinishEvent, UiPart};
use braid::util::retry::RetryPolicy;
use common::{text_step, tool_step, MockProvider, Script};
use futures::{FutureExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::json;

fn delete_tool(executions: Arc<AtomicUsize>) -> AgentTool {
    AgentTool::new(
        "delete_file",
        "Delete a file",
        JsonSchema::object().string("path", "File path", true).build(),
        move |input, _ctx| {
            let executions = executions.clone();
            async move {
                executions.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"deleted": input["path"]}))
            }
        },
    )
    .with_approval()
}

fn delete_step() -> Script {
    Script::Parts(tool_step(&[("c1", "delete_file", json!({"path": "/tmp/a"}))]))
}

fn request(provider: Arc<MockProvider>, tools: ToolSet) -> RunRequest {
    RunRequest::new(provider, vec![ModelMessage::user("clean up")])
        .with_tools(tools)
        .with_retry(RetryPolicy::none())
}

fn handler(decision: ApprovalDecision, seen: Arc<Mutex<Vec<ApprovalRequest>>>) -> ApprovalHandler {
    Arc::new(move |request: ApprovalRequest| {
        seen.lock().unwrap().push(request);
        futures::future::ready(decision.clone()).boxed()
    })
}

#[tokio::test]
async fn approved_calls_execute_after_the_request_part() {
    let executions = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let provider = MockProvider::arc(vec![
        delete_step(),
        Script::Parts(text_step("t1", &["Deleted."], FinishReason::Stop)),
    ]);
    let result = stream_text(
        request(provider, ToolSet::new().with(delete_tool(executions.clone())))
            .with_approval_handler(handler(ApprovalDecision::Approve, seen.clone())),
    );
    let parts: Vec<StreamPart> = result.full_stream().collect().await;

    let request_at = parts
        .iter()
        .position(|p| matches!(p, StreamPart::ToolApprovalRequest { .. }))
        .unwrap();
    let result_at = parts
        .iter()
        .position(|p| matches!(p, StreamPart::ToolResult(_)))
        .unwrap();
    assert!(request_at < result_at);
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].tool_call.tool_call_id, "c1");
    assert!(seen[0].approval_id.starts_with("approval-"));
}

#[tokio::test]
async fn denied_calls_never_execute() {
    let executions = Arc::new(AtomicUsize::new(0));
    let provider = MockProvider::arc(vec![
        delete_step(),
        Script::Parts(text_step("t1", &["Okay, I won't."], FinishReason::Stop)),
    ]);
    let result = stream_text(
        request(provider.clone(), ToolSet::new().with(delete_tool(executions.clone())))
            .with_approval_handler(handler(
                ApprovalDecision::Deny {
                    reason: Some("too risky".to_string()),
                },
                Arc::new(Mutex::new(Vec::new())),
            )),
    );
    let parts: Vec<StreamPart> = result.full_stream().collect().await;

    let denied = parts
        .iter()
        .find_map(|p| match p {
            StreamPart::ToolError(e) => Some(e.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(denied.kind, ToolErrorKind::Denied);
    assert_eq!(executions.load(Ordering::SeqCst), 0);
    assert_eq!(result.output().await.unwrap().text, "Okay, I won't.");
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn unanswered_approvals_pause_the_run_and_resume_later() {
    let executions = Arc::new(AtomicUsize::new(0));
    let tools = ToolSet::new().with(delete_tool(executions.clone()));

    let first = MockProvider::arc(vec![delete_step()]);
    let result = stream_text(request(first.clone(), tools.clone()));
    let parts: Vec<StreamPart> = result.full_stream().collect().await;
    assert!(matches!(parts.last(), Some(StreamPart::Finish { .. })));

    let paused = result.output().await.unwrap();
    assert_eq!(paused.status, RunStatus::AwaitingApproval);
    assert_eq!(paused.pending_approvals.len(), 1);
    assert_eq!(executions.load(Ordering::SeqCst), 0);
    assert_eq!(first.calls(), 1);

    let approval_id = paused.pending_approvals[0].approval_id.clone();
    let mut messages = vec![ModelMessage::user("clean up")];
    messages.extend(paused.response_messages.clone());
    messages.push(ModelMessage::approval_response(&approval_id, true, None));

    let second = MockProvider::arc(vec![Script::Parts(text_step(
        "t1",
        &["Deleted /tmp/a."],
        FinishReason::Stop,
    ))]);
    let resumed = generate_text(
        RunRequest::new(second.clone(), messages)
            .with_tools(tools)
            .with_retry(RetryPolicy::none()),
    )
    .await
    .unwrap();

    assert_eq!(resumed.status, RunStatus::Done);
    assert_eq!(resumed.text, "Deleted /tmp/a.");
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    let requests = second.requests();
    let sent = &requests[0].messages;
    let tool_message = sent.iter().rev().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_message.content.iter().any(|c| matches!(
        c,
        ContentPart::ToolResult { tool_call_id, is_error: false, .. } if tool_call_id == "c1"
    )));
}

#[tokio::test]
async fn resumed_denials_reach_the_model_as_errors() {
    let executions = Arc::new(AtomicUsize::new(0));
    let tools = ToolSet::new().with(delete_tool(executions.clone()));
    let paused = generate_text(request(MockProvider::arc(vec![delete_step()]), tools.clone()))
        .await
        .unwrap();

    let mut messages = vec![ModelMessage::user("clean up")];
    messages.extend(paused.response_messages);
    messages.push(ModelMessage::approval_response(
        &paused.pending_approvals[0].approval_id,
        false,
        Some("keep it".to_string()),
    ));
    let second = MockProvider::arc(vec![Script::Parts(text_step("t1", &["Kept."], FinishReason::Stop))]);
    generate_text(
        RunRequest::new(second.clone(), messages)
            .with_tools(tools)
            .with_retry(RetryPolicy::none()),
    )
    .await
    .unwrap();

    assert_eq!(executions.load(Ordering::SeqCst), 0);
    let requests = second.requests();
    let tool_message = requests[0]
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert!(tool_message
        .content
        .iter()
        .any(|c| matches!(c, ContentPart::ToolResult { is_error: true, .. })));
}

#[tokio::test]
async fn approvals_round_trip_through_ui_messages() {
    let executions = Arc::new(AtomicUsize::new(0));
    let tools = ToolSet::new().with(delete_tool(executions.clone()));
    let user = UiMessage::user("clean up");

    let finished: Arc<Mutex<Option<UiFinishEvent>>> = Arc::new(Mutex::new(None));
    let sink = finished.clone();
    let options = UiStreamOptions::default()
        .with_original_messages(vec![user.clone()])
        .with_on_finish(move |event: UiFinishEvent| {
            *sink.lock().unwrap() = Some(event);
            futures::future::ready(Ok(())).boxed()
        });
    let result = stream_text(request(MockProvider::arc(vec![delete_step()]), tools.clone()));
    let _chunks: Vec<UiChunk> = result.ui_message_stream(options).collect().await;

    let event = finished.lock().unwrap().take().unwrap();
    let mut assistant = event.response_message;
    let tool = assistant.tool_parts().next().unwrap().clone();
    assert_eq!(tool.state, ToolInvocationState::AwaitingApproval);
    let approval_id = tool.approval.as_ref().unwrap().id.clone();
    assistant.respond_to_approval(&approval_id, true, None).unwrap();

    let ui_history = vec![user, assistant];
    let second = MockProvider::arc(vec![Script::Parts(text_step("t1", &["Done."], FinishReason::Stop))]);
    let resumed = stream_text(
        RunRequest::new(second, convert_to_model_messages(&ui_history))
            .with_tools(tools)
            .with_retry(RetryPolicy::none()),
    );
    let finished_again: Arc<Mutex<Option<UiFinishEvent>>> = Arc::new(Mutex::new(None));
    let sink = finished_again.clone();
    let options = UiStreamOptions::default()
        .with_original_messages(ui_history)
        .with_on_finish(move |event: UiFinishEvent| {
            *sink.lock().unwrap() = Some(event);
            futures::future::ready(Ok(())).boxed()
        });
    let _chunks: Vec<UiChunk> = resumed.ui_message_stream(options).collect().await;

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    let event = finished_again.lock().unwrap().take().unwrap();
    assert!(event.is_continuation);
    assert_eq!(event.messages.len(), 2);
    let message = event.response_message;
    let tool = message.tool_parts().next().unwrap();
    assert_eq!(tool.state, ToolInvocationState::OutputAvailable);
    assert_eq!(tool.output, Some(json!({"deleted": "/tmp/a"})));
    assert!(message
        .parts
        .iter()
        .any(|p| matches!(p, UiPart::Text { text, .. } if text == "Done.")));
}

#[tokio::test]
async fn status_reads_awaiting_approval_while_the_handler_decides() {
    let executions = Arc::new(AtomicUsize::new(0));
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let release_rx = Arc::new(Mutex::new(Some(release_rx)));
    let slow_handler: ApprovalHandler = Arc::new(move |_request: ApprovalRequest| {
        let release = release_rx.lock().unwrap().take();
        async move {
            if let Some(release) = release {
                let _ = release.await;
            }
            ApprovalDecision::Approve
        }
        .boxed()
    });
    let provider = MockProvider::arc(vec![
        delete_step(),
        Script::Parts(text_step("t1", &["Deleted."], FinishReason::Stop)),
    ]);
    let result = stream_text(
        request(provider, ToolSet::new().with(delete_tool(executions.clone())))
            .with_approval_handler(slow_handler),
    );
    let handle = result.handle().clone();
    let consumer = tokio::spawn(result.full_stream().collect::<Vec<StreamPart>>());

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while handle.status() != RunStatus::AwaitingApproval {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(handle.snapshot().status, RunStatus::Running);
    let waiter = tokio::spawn({
        let handle = handle.clone();
        async move { handle.wait().await }
    });
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());
    assert_eq!(executions.load(Ordering::SeqCst), 0);

    release_tx.send(()).unwrap();
    consumer.await.unwrap();
    let run = waiter.await.unwrap();
    assert_eq!(run.status, RunStatus::Done);
    assert_eq!(handle.status(), RunStatus::Done);
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}
