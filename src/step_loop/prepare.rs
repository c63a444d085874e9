//! Per-step hooks: step preparation and tool call repair.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::error::{BraidError, ToolCallError};
use crate::provider::ModelProvider;
use crate::tools::ToolDefinition;
use crate::types::{GenerationSettings, ModelMessage, Step, ToolCall, ToolChoice};

/// What a [`PrepareStepFn`] sees before step `step_number` is issued.
#[derive(Debug, Clone)]
pub struct PrepareStepContext {
    pub step_number: usize,
    /// Steps sealed so far, in order.
    pub steps: Vec<Step>,
    /// The conversation the step would be sent.
    pub messages: Vec<ModelMessage>,
}

/// Overrides for a single step. `None` keeps the run-level value.
#[derive(Clone, Default)]
pub struct StepOverrides {
    pub provider: Option<Arc<dyn ModelProvider>>,
    /// Replaces the prompt for this step only. The run's conversation is unchanged.
    pub messages: Option<Vec<ModelMessage>>,
    pub settings: Option<GenerationSettings>,
    pub tool_choice: Option<ToolChoice>,
    pub active_tools: Option<Vec<String>>,
}

impl StepOverrides {
    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_messages(mut self, messages: Vec<ModelMessage>) -> Self {
        self.messages = Some(messages);
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    pub fn with_active_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.active_tools = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

impl std::fmt::Debug for StepOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepOverrides")
            .field("provider", &self.provider.as_ref().map(|p| p.provider_name()))
            .field("messages", &self.messages.as_ref().map(Vec::len))
            .field("tool_choice", &self.tool_choice)
            .field("active_tools", &self.active_tools)
            .finish_non_exhaustive()
    }
}

/// Hook run before every model call. An error fails the run.
pub type PrepareStepFn =
    Arc<dyn Fn(PrepareStepContext) -> BoxFuture<'static, Result<StepOverrides, BraidError>> + Send + Sync>;

/// Wrap an async closure as a [`PrepareStepFn`].
pub fn prepare_step<F, Fut>(f: F) -> PrepareStepFn
where
    F: Fn(PrepareStepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StepOverrides, BraidError>> + Send + 'static,
{
    Arc::new(move |context| f(context).boxed())
}

/// A tool call that failed lookup or input validation.
#[derive(Debug, Clone)]
pub struct RepairRequest {
    pub tool_call: ToolCall,
    pub error: ToolCallError,
    /// Tools offered to the model in this step.
    pub tools: Vec<ToolDefinition>,
    pub messages: Vec<ModelMessage>,
}

/// Hook that may fix a failed tool call. `Ok(None)` keeps the original error,
/// `Err` replaces it. A repaired call is validated again.
pub type ToolCallRepairFn = Arc<
    dyn Fn(RepairRequest) -> BoxFuture<'static, Result<Option<ToolCall>, ToolCallError>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`ToolCallRepairFn`].
pub fn repair_tool_call<F, Fut>(f: F) -> ToolCallRepairFn
where
    F: Fn(RepairRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<ToolCall>, ToolCallError>> + Send + 'static,
{
    Arc::new(move |request| f(request).boxed())
}

/// Settings for one model call after overrides are applied.
pub(super) struct StepPlan {
    pub(super) provider: Arc<dyn ModelProvider>,
    pub(super) messages: Vec<ModelMessage>,
    pub(super) settings: GenerationSettings,
    pub(super) tools: Vec<ToolDefinition>,
    pub(super) tool_choice: Option<ToolChoice>,
}
