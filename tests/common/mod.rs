//! Shared test helpers and a scripted mock provider.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use braid::error::BraidError;
use braid::provider::{ModelCapabilities, ModelProvider, ProviderRequest, ProviderStream};
use braid::types::*;

/// What the provider does on one call.
pub enum Script {
    /// Stream these parts, then end.
    Parts(Vec<StreamPart>),
    /// Stream these parts, then stall forever.
    Hang(Vec<StreamPart>),
    /// Fail the call before any part.
    Fail(BraidError),
}

/// A provider that replays one script per call and records every request.
pub struct MockProvider {
    model_id: String,
    capabilities: ModelCapabilities,
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl MockProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            model_id: "mock-model".to_string(),
            capabilities: ModelCapabilities::full(128_000),
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn arc(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self::new(scripts))
    }

    pub fn with_capabilities(mut self, capabilities: ModelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ProviderStream, BraidError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Parts(parts)) => Ok(ProviderStream::new(
                stream::iter(parts.into_iter().map(Ok)).boxed(),
            )),
            Some(Script::Hang(parts)) => Ok(ProviderStream::new(
                stream::iter(parts.into_iter().map(Ok))
                    .chain(stream::pending())
                    .boxed(),
            )),
            Some(Script::Fail(err)) => Err(err),
            None => Err(BraidError::Configuration(
                "mock provider has no script left".to_string(),
            )),
        }
    }
}

pub fn usage(input: u32, output: u32) -> Usage {
    Usage::new(input, output)
}

/// A text block streamed in `chunks`, ending the step with `finish_reason`.
pub fn text_step(id: &str, chunks: &[&str], finish_reason: FinishReason) -> Vec<StreamPart> {
    let mut parts = vec![StreamPart::TextStart { id: id.to_string() }];
    parts.extend(chunks.iter().map(|c| StreamPart::text_delta(id, *c)));
    parts.push(StreamPart::TextEnd { id: id.to_string() });
    parts.push(StreamPart::finish_step(finish_reason, Some(usage(10, 5))));
    parts
}

/// A step that calls each `(id, name, input)` tool and ends with `tool-calls`.
pub fn tool_step(calls: &[(&str, &str, Value)]) -> Vec<StreamPart> {
    let mut parts = Vec::new();
    for (id, name, input) in calls {
        parts.push(StreamPart::ToolInputStart {
            tool_call_id: id.to_string(),
            tool_name: name.to_string(),
        });
        parts.push(StreamPart::ToolCallDelta {
            tool_call_id: id.to_string(),
            tool_name: name.to_string(),
            input_text_delta: input.to_string(),
        });
        parts.push(StreamPart::ToolCall(ToolCall::new(*id, *name, input.clone())));
    }
    parts.push(StreamPart::finish_step(FinishReason::ToolCalls, Some(usage(10, 5))));
    parts
}

/// Wire names of `parts`, for order assertions.
pub fn type_names(parts: &[StreamPart]) -> Vec<&'static str> {
    parts.iter().map(StreamPart::type_name).collect()
}
