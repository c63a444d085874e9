//! Tests for per-step preparation, active tools, tool choice and call repair.

mod common;

use std::sync::{Arc, Mutex};

use braid::error::{BraidError, ToolCallError};
use braid::generation::{generate_text, stream_text};
use braid::prelude::*;
use braid::step_loop::{prepare_step, repair_tool_call, PrepareStepContext, RepairRequest};
use braid::types::{ContentBlock, ToolError, ToolErrorKind};
use braid::util::retry::RetryPolicy;
use common::{text_step, tool_step, type_names, MockProvider, Script};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;

fn weather_tool() -> AgentTool {
    AgentTool::new(
        "weather",
        "Current weather for a city",
        JsonSchema::object().string("city", "City name", true).build(),
        |input, _ctx| async move { Ok(json!({"city": input["city"], "temp": 21})) },
    )
}

fn search_tool() -> AgentTool {
    AgentTool::new("search", "Search the web", JsonSchema::empty(), |_, _| async {
        Ok(json!([]))
    })
}

fn tools() -> ToolSet {
    ToolSet::new().with(weather_tool()).with(search_tool())
}

fn request(provider: Arc<MockProvider>) -> RunRequest {
    RunRequest::new(provider, vec![ModelMessage::user("Weather in Oslo?")])
        .with_tools(tools())
        .with_retry(RetryPolicy::none())
}

fn offered(request: &ProviderRequest) -> Vec<String> {
    request
        .tools
        .iter()
        .flatten()
        .map(|d| d.name.clone())
        .collect()
}

fn tool_errors(output: &GenerateTextResult) -> Vec<ToolError> {
    output
        .steps
        .iter()
        .flat_map(|s| s.content.iter())
        .filter_map(|block| match block {
            ContentBlock::ToolError(err) => Some(err.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn active_tools_limit_what_the_model_is_offered() {
    let provider = MockProvider::arc(vec![Script::Parts(text_step(
        "t1",
        &["Sunny"],
        FinishReason::Stop,
    ))]);
    generate_text(
        request(provider.clone())
            .with_active_tools(["search"])
            .with_tool_choice(ToolChoice::Required),
    )
    .await
    .unwrap();

    let requests = provider.requests();
    assert_eq!(offered(&requests[0]), vec!["search"]);
    assert_eq!(requests[0].tool_choice, Some(ToolChoice::Required));
}

#[tokio::test]
async fn tool_choice_is_dropped_when_no_tool_is_offered() {
    let provider = MockProvider::arc(vec![Script::Parts(text_step(
        "t1",
        &["Sunny"],
        FinishReason::Stop,
    ))]);
    generate_text(
        request(provider.clone())
            .with_active_tools(Vec::<String>::new())
            .with_tool_choice(ToolChoice::Required),
    )
    .await
    .unwrap();

    let requests = provider.requests();
    assert!(requests[0].tools.is_none());
    assert_eq!(requests[0].tool_choice, None);
}

#[tokio::test]
async fn prepare_step_overrides_tools_per_step() {
    let seen: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_hook = seen.clone();
    let prepare = prepare_step(move |context: PrepareStepContext| {
        seen_in_hook
            .lock()
            .unwrap()
            .push((context.step_number, context.steps.len()));
        async move {
            let overrides = if context.step_number == 0 {
                StepOverrides::default()
                    .with_active_tools(["weather"])
                    .with_tool_choice(ToolChoice::tool("weather"))
            } else {
                StepOverrides::default()
            };
            Ok(overrides)
        }
    });
    let provider = MockProvider::arc(vec![
        Script::Parts(tool_step(&[("c1", "weather", json!({"city": "Oslo"}))])),
        Script::Parts(text_step("t1", &["Sunny"], FinishReason::Stop)),
    ]);
    let output = generate_text(
        request(provider.clone())
            .with_tool_choice(ToolChoice::Auto)
            .with_prepare_step(prepare),
    )
    .await
    .unwrap();

    assert_eq!(output.text, "Sunny");
    let requests = provider.requests();
    assert_eq!(offered(&requests[0]), vec!["weather"]);
    assert_eq!(requests[0].tool_choice, Some(ToolChoice::tool("weather")));
    assert_eq!(offered(&requests[1]), vec!["weather", "search"]);
    assert_eq!(requests[1].tool_choice, Some(ToolChoice::Auto));
    assert_eq!(*seen.lock().unwrap(), vec![(0, 0), (1, 1)]);
}

#[tokio::test]
async fn prepare_step_can_swap_the_model_and_prompt_for_one_step() {
    let first = MockProvider::arc(vec![Script::Parts(tool_step(&[(
        "c1",
        "weather",
        json!({"city": "Oslo"}),
    )]))]);
    let second = MockProvider::arc(vec![Script::Parts(text_step(
        "t1",
        &["Sunny"],
        FinishReason::Stop,
    ))]);
    let second_for_hook = second.clone();
    let prepare = prepare_step(move |context: PrepareStepContext| {
        let second: Arc<dyn ModelProvider> = second_for_hook.clone();
        async move {
            if context.step_number == 0 {
                return Ok(StepOverrides::default()
                    .with_messages(vec![ModelMessage::user("Only call weather.")]));
            }
            Ok(StepOverrides::default().with_provider(second))
        }
    });

    let output = generate_text(request(first.clone()).with_prepare_step(prepare))
        .await
        .unwrap();

    assert_eq!(output.text, "Sunny");
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 1);
    assert_eq!(first.requests()[0].messages[0].text(), "Only call weather.");
    assert_eq!(output.steps[0].input_messages[0].text(), "Only call weather.");
    let step_two_prompt = &second.requests()[0].messages;
    assert_eq!(step_two_prompt[0].text(), "Weather in Oslo?");
    assert_eq!(step_two_prompt.len(), 3);
}

#[tokio::test]
async fn prepare_step_errors_fail_the_run_before_any_step() {
    let provider = MockProvider::arc(Vec::new());
    let prepare = prepare_step(|_| async {
        Err(BraidError::Configuration("no model for step".to_string()))
    });
    let result = stream_text(request(provider.clone()).with_prepare_step(prepare));
    let parts: Vec<StreamPart> = result.full_stream().collect().await;

    assert_eq!(type_names(&parts), vec!["error"]);
    assert!(matches!(
        result.output().await,
        Err(BraidError::Configuration(_))
    ));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn repaired_tool_calls_are_executed() {
    let repair = repair_tool_call(|request: RepairRequest| async move {
        assert!(matches!(request.error, ToolCallError::NotFound(_)));
        assert_eq!(request.tools.len(), 2);
        let mut fixed = request.tool_call;
        fixed.tool_name = "weather".to_string();
        Ok(Some(fixed))
    });
    let provider = MockProvider::arc(vec![
        Script::Parts(tool_step(&[("c1", "wether", json!({"city": "Oslo"}))])),
        Script::Parts(text_step("t1", &["Sunny"], FinishReason::Stop)),
    ]);
    let output = generate_text(request(provider).with_tool_call_repair(repair))
        .await
        .unwrap();

    assert_eq!(output.tool_calls[0].tool_name, "weather");
    assert_eq!(output.tool_calls[0].tool_call_id, "c1");
    assert!(!output.tool_calls[0].invalid);
    assert_eq!(output.tool_results.len(), 1);
    assert_eq!(output.tool_results[0].output["temp"], 21);
    assert!(tool_errors(&output).is_empty());
}

#[tokio::test]
async fn declined_repairs_keep_the_original_error() {
    let repair = repair_tool_call(|_| async { Ok(None) });
    let provider = MockProvider::arc(vec![
        Script::Parts(tool_step(&[("c1", "weather", json!({"town": "Oslo"}))])),
        Script::Parts(text_step("t1", &["Which city?"], FinishReason::Stop)),
    ]);
    let output = generate_text(request(provider).with_tool_call_repair(repair))
        .await
        .unwrap();

    let errors = tool_errors(&output);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ToolErrorKind::InputValidation);
    assert!(output.tool_calls[0].invalid);
}

#[tokio::test]
async fn failed_repairs_replace_the_error() {
    let repair = repair_tool_call(|_| async {
        Err(ToolCallError::execution("repair model unavailable"))
    });
    let provider = MockProvider::arc(vec![
        Script::Parts(tool_step(&[("c1", "forecast", json!({}))])),
        Script::Parts(text_step("t1", &["Sorry"], FinishReason::Stop)),
    ]);
    let output = generate_text(request(provider).with_tool_call_repair(repair))
        .await
        .unwrap();

    let errors = tool_errors(&output);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ToolErrorKind::Execution);
    assert!(errors[0].error.contains("repair model unavailable"));
    assert_eq!(
        output.tool_calls[0].error.as_deref(),
        Some("tool execution failed: repair model unavailable")
    );
}
