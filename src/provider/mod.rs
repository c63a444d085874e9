//! Model provider boundary.
//!
//! Concrete adapters live outside this crate. They implement
//! [`ModelProvider`] and are registered into a [`ProviderRegistry`].

pub mod config;

pub use config::{ProviderConfig, ProviderFactory, ProviderKind, ProviderRegistry};

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::aggregate::ContentAggregator;
use crate::error::BraidError;
use crate::tools::ToolDefinition;
use crate::types::{
    ContentBlock, FinishReason, GenerationSettings, ModelMessage, ProviderMetadata,
    ResponseFormat, StreamPart, ToolChoice, Usage,
};

/// A request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub messages: Vec<ModelMessage>,
    pub settings: GenerationSettings,
    pub tools: Option<Vec<ToolDefinition>>,
    /// Only set when tools are offered.
    pub tool_choice: Option<ToolChoice>,
    pub response_format: Option<ResponseFormat>,
}

/// Parts produced by one provider call.
pub type PartStream = BoxStream<'static, Result<StreamPart, BraidError>>;

/// A streaming provider call: the parts plus what was sent.
pub struct ProviderStream {
    pub parts: PartStream,
    /// Raw request body as sent to the provider, for step retention.
    pub request_body: Option<serde_json::Value>,
}

impl ProviderStream {
    pub fn new(parts: PartStream) -> Self {
        Self {
            parts,
            request_body: None,
        }
    }

    pub fn with_request_body(mut self, body: serde_json::Value) -> Self {
        self.request_body = Some(body);
        self
    }
}

impl std::fmt::Debug for ProviderStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderStream")
            .field("request_body", &self.request_body)
            .finish_non_exhaustive()
    }
}

/// Response from a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub content: Vec<ContentBlock>,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
    pub provider_metadata: ProviderMetadata,
}

impl ProviderResponse {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// What a model can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub supports_tools: bool,
    pub supports_json_schema: bool,
    pub supports_reasoning: bool,
    pub context_length: Option<usize>,
}

impl ModelCapabilities {
    /// Tools, JSON schema output and reasoning.
    pub fn full(context_length: usize) -> Self {
        Self {
            supports_tools: true,
            supports_json_schema: true,
            supports_reasoning: true,
            context_length: Some(context_length),
        }
    }

    /// Plain text generation only.
    pub fn text_only(context_length: usize) -> Self {
        Self {
            context_length: Some(context_length),
            ..Self::default()
        }
    }
}

/// Core trait implemented by all model providers.
///
/// A stream carries the parts of exactly one step and should end with a
/// `finish-step` part. Failures are reported as `Err` items (or an `error`
/// part), never as panics.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai", "google").
    fn provider_name(&self) -> &str;

    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Capabilities of the model.
    fn capabilities(&self) -> ModelCapabilities;

    /// Start a streaming call.
    async fn stream(&self, request: &ProviderRequest) -> Result<ProviderStream, BraidError>;

    /// Single response. The default collects [`ModelProvider::stream`].
    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, BraidError> {
        let mut stream = self.stream(request).await?.parts;
        let mut aggregator = ContentAggregator::new();
        let mut finish: Option<(FinishReason, Option<Usage>, ProviderMetadata)> = None;

        while let Some(part) = stream.next().await {
            let part = part?;
            match &part {
                StreamPart::Error { message, .. } => {
                    return Err(BraidError::provider(self.provider_name(), None, message.clone()));
                }
                StreamPart::FinishStep {
                    finish_reason,
                    usage,
                    provider_metadata,
                    ..
                } => {
                    finish = Some((*finish_reason, usage.clone(), provider_metadata.clone()));
                }
                StreamPart::Finish { .. } | StreamPart::StartStep { .. } => continue,
                _ => {}
            }
            aggregator.apply(&part)?;
            if finish.is_some() {
                break;
            }
        }

        let (finish_reason, usage, provider_metadata) =
            finish.unwrap_or((FinishReason::Unknown, None, ProviderMetadata::new()));
        let content = match aggregator.steps().last() {
            Some(step) => step.content.clone(),
            None => aggregator.content().to_vec(),
        };
        Ok(ProviderResponse {
            content,
            finish_reason,
            usage,
            provider_metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Fixed(Vec<Result<StreamPart, BraidError>>);

    #[async_trait]
    impl ModelProvider for Fixed {
        fn provider_name(&self) -> &str {
            "fixed"
        }

        fn model_id(&self) -> &str {
            "fixed-1"
        }

        fn capabilities(&self) -> ModelCapabilities {
            ModelCapabilities::text_only(1024)
        }

        async fn stream(&self, _request: &ProviderRequest) -> Result<ProviderStream, BraidError> {
            Ok(ProviderStream::new(futures::stream::iter(self.0.clone()).boxed()))
        }
    }

    #[tokio::test]
    async fn default_generate_collects_the_stream() {
        let provider = Fixed(vec![
            Ok(StreamPart::text_delta("t", "Hello")),
            Ok(StreamPart::text_delta("t", " there")),
            Ok(StreamPart::finish_step(FinishReason::Stop, Some(Usage::new(3, 2)))),
        ]);
        let response = provider.generate(&ProviderRequest::default()).await.unwrap();
        assert_eq!(response.text(), "Hello there");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage, Some(Usage::new(3, 2)));
    }

    #[tokio::test]
    async fn default_generate_surfaces_errors() {
        let provider = Fixed(vec![
            Ok(StreamPart::text_delta("t", "Hel")),
            Err(BraidError::provider("fixed", Some(500), "upstream failed")),
        ]);
        let err = provider.generate(&ProviderRequest::default()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
