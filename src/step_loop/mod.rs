//! Multi-step generation: model calls, tool execution, approvals and continuation.
//!
//! A run moves through `Init -> Calling -> StepFinished -> {Calling | Done |
//! Failed | AwaitingApproval}`. Every part it produces flows through one
//! output stream that ends with exactly one `finish` or `error` part.

pub mod approvals;
pub mod events;

mod continuation;
mod engine;
mod limits;
mod messages;
pub mod prepare;
mod tooling;

pub use approvals::{ApprovalDecision, ApprovalHandler, ApprovalRequest};
pub use prepare::{
    prepare_step, repair_tool_call, PrepareStepContext, PrepareStepFn, RepairRequest,
    StepOverrides, ToolCallRepairFn,
};
pub use events::{EventBus, RunEvent, RunEventListener, RunEventPayload, RunLifecycle};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::abort::{AbortReason, AbortSignal};
use crate::config::BraidConfig;
use crate::error::BraidError;
use crate::multiplex::BufferConfig;
use crate::provider::ModelProvider;
use crate::stop::StopCondition;
use crate::stream_transform::StreamTransform;
use crate::tools::ToolSet;
use crate::types::{
    GenerationSettings, ModelMessage, RetentionSettings, Run, RunId, RunStatus, StreamPart,
    ToolChoice,
};
use crate::util::lock;
use crate::util::retry::RetryPolicy;

use limits::DEFAULT_MAX_STEPS;

/// Parts in flight between the run task and the consumer. Kept small so a
/// slow consumer holds the run back instead of growing a queue.
const PART_CHANNEL_CAPACITY: usize = 1;

/// Request payload to start a run.
#[derive(Clone)]
pub struct RunRequest {
    pub run_id: RunId,
    pub provider: Arc<dyn ModelProvider>,
    pub messages: Vec<ModelMessage>,
    pub settings: GenerationSettings,
    pub tools: ToolSet,
    /// Names of the tools offered to the model. `None` offers all of them.
    pub active_tools: Option<Vec<String>>,
    pub tool_choice: Option<ToolChoice>,
    pub prepare_step: Option<PrepareStepFn>,
    pub repair_tool_call: Option<ToolCallRepairFn>,
    /// Checked after every step; any match ends the run.
    pub stop_when: Vec<Arc<dyn StopCondition>>,
    pub max_steps: usize,
    /// Re-invoke the model when a step is truncated by `length`.
    pub continuation: bool,
    pub approval_handler: Option<ApprovalHandler>,
    pub retry: RetryPolicy,
    /// Bounds call establishment and every wait for the next part.
    pub call_timeout: Option<Duration>,
    /// Bounds the whole run.
    pub timeout: Option<Duration>,
    pub retention: RetentionSettings,
    /// Forward provider `raw` parts to the output stream.
    pub include_raw: bool,
    pub abort: Option<AbortSignal>,
    pub events: EventBus,
    /// Applied to the output stream before it is multiplexed.
    pub transforms: Vec<Arc<dyn StreamTransform>>,
    pub buffer: BufferConfig,
}

impl std::fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRequest")
            .field("run_id", &self.run_id)
            .field("provider", &self.provider.provider_name())
            .field("model", &self.provider.model_id())
            .field("messages", &self.messages.len())
            .field("tools", &self.tools.names())
            .field("active_tools", &self.active_tools)
            .field("tool_choice", &self.tool_choice)
            .field("max_steps", &self.max_steps)
            .field("continuation", &self.continuation)
            .finish_non_exhaustive()
    }
}

impl RunRequest {
    pub fn new(provider: Arc<dyn ModelProvider>, messages: Vec<ModelMessage>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            provider,
            messages,
            settings: GenerationSettings::default(),
            tools: ToolSet::new(),
            active_tools: None,
            tool_choice: None,
            prepare_step: None,
            repair_tool_call: None,
            stop_when: Vec::new(),
            max_steps: DEFAULT_MAX_STEPS,
            continuation: false,
            approval_handler: None,
            retry: RetryPolicy::default(),
            call_timeout: None,
            timeout: None,
            retention: RetentionSettings::default(),
            include_raw: false,
            abort: None,
            events: EventBus::new(),
            transforms: Vec::new(),
            buffer: BufferConfig::default(),
        }
    }

    /// Apply the loop defaults from `config`.
    pub fn with_config(mut self, config: &BraidConfig) -> Self {
        let settings = config.loop_settings();
        self.max_steps = settings.max_steps;
        self.continuation = settings.continuation;
        self.call_timeout = settings.call_timeout();
        self.timeout = settings.timeout();
        self.include_raw = settings.include_raw;
        self.retry = settings.retry;
        self.buffer = settings.buffer;
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
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

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    pub fn with_prepare_step(mut self, prepare: PrepareStepFn) -> Self {
        self.prepare_step = Some(prepare);
        self
    }

    pub fn with_tool_call_repair(mut self, repair: ToolCallRepairFn) -> Self {
        self.repair_tool_call = Some(repair);
        self
    }

    pub fn with_stop_when(mut self, condition: Arc<dyn StopCondition>) -> Self {
        self.stop_when.push(condition);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_continuation(mut self, enabled: bool) -> Self {
        self.continuation = enabled;
        self
    }

    pub fn with_approval_handler(mut self, handler: ApprovalHandler) -> Self {
        self.approval_handler = Some(handler);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retention(mut self, retention: RetentionSettings) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_include_raw(mut self, include_raw: bool) -> Self {
        self.include_raw = include_raw;
        self
    }

    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort = Some(signal);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn StreamTransform>) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn with_buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = buffer;
        self
    }
}

/// Mutable record shared between the run task and its handles.
#[derive(Debug)]
pub(crate) struct RunState {
    pub(crate) run: Run,
    pub(crate) error: Option<BraidError>,
}

/// Handle for an in-flight run. Clones observe the same run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: RunId,
    state: Arc<Mutex<RunState>>,
    status: watch::Receiver<RunStatus>,
    abort: AbortSignal,
    events: EventBus,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Cancel the run. Idempotent.
    pub fn abort(&self) {
        self.abort.trigger(AbortReason::User);
    }

    /// The run's abort signal.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Current status. Reads `AwaitingApproval` while an approval handler is
    /// deciding, then `Running` again.
    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// A copy of the run as it stands now.
    pub fn snapshot(&self) -> Run {
        lock(&self.state).run.clone()
    }

    /// The error that ended the run, if it failed or was aborted.
    pub fn error(&self) -> Option<BraidError> {
        lock(&self.state).error.clone()
    }

    /// Wait until the run reaches a terminal status.
    pub async fn wait(&self) -> Run {
        let mut status = self.status.clone();
        let finished = status
            .wait_for(|_| lock(&self.state).run.status.is_terminal())
            .await;
        if finished.is_err() {
            tracing::debug!(run_id = %self.run_id, "run task ended without a terminal status");
        }
        self.snapshot()
    }

    /// The final run, or the error that ended it.
    pub async fn result(&self) -> Result<Run, BraidError> {
        let run = self.wait().await;
        match self.error() {
            Some(err) => Err(err),
            None if run.status.is_terminal() => Ok(run),
            None => Err(BraidError::InvalidState(format!(
                "run {} stopped while {}",
                run.id, run.status
            ))),
        }
    }
}

/// Start a run. Returns its raw part stream and a handle.
///
/// The run executes on a spawned task that only advances while the stream is
/// being consumed. Dropping the stream aborts the run. Must be called from
/// within a tokio runtime.
pub fn run_step_loop(request: RunRequest) -> (BoxStream<'static, StreamPart>, RunHandle) {
    let abort = match &request.abort {
        Some(signal) => signal.child(),
        None => AbortSignal::new(),
    };
    if let Some(timeout) = request.timeout {
        abort.arm_timeout(timeout);
    }

    let run_id = request.run_id;
    let state = Arc::new(Mutex::new(RunState {
        run: Run::new(run_id),
        error: None,
    }));
    let (status_tx, status_rx) = watch::channel(RunStatus::Running);
    let (tx, rx) = mpsc::channel(PART_CHANNEL_CAPACITY);

    let handle = RunHandle {
        run_id,
        state: state.clone(),
        status: status_rx,
        abort: abort.clone(),
        events: request.events.clone(),
    };

    let ctx = engine::RunContext::new(request, abort, tx, state, status_tx);
    tokio::spawn(engine::run(ctx));

    (ReceiverStream::new(rx).boxed(), handle)
}
