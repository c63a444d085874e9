//! Per-run lifecycle events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::abort::AbortReason;
use crate::tools::ToolInvocationState;
use crate::types::{FinishReason, RunId, StepKind, ToolCall, Usage};
use crate::util::lock;

/// Envelope delivered to every listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: RunId,
    /// Starts at 1 and increases by one per event of the run.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: RunEventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunLifecycle {
    Started,
    Completed,
    AwaitingApproval,
    Failed { error: String },
    Aborted { reason: AbortReason },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventPayload {
    Lifecycle {
        lifecycle: RunLifecycle,
    },
    StepStarted {
        index: usize,
        kind: StepKind,
    },
    StepFinished {
        index: usize,
        finish_reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    ToolCallStarted {
        call: ToolCall,
    },
    ToolCallCompleted {
        tool_call_id: String,
        tool_name: String,
        state: ToolInvocationState,
    },
    ApprovalRequired {
        approval_id: String,
        call: ToolCall,
    },
    ContinuationScheduled {
        index: usize,
    },
    Error {
        message: String,
    },
}

/// Callback invoked synchronously for every event.
pub type RunEventListener = Arc<dyn Fn(&RunEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    listeners: Mutex<Vec<RunEventListener>>,
    channels: Mutex<Vec<mpsc::UnboundedSender<RunEvent>>>,
    seq: AtomicU64,
}

/// Event bus owned by one run. Clones share listeners and sequence numbers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &lock(&self.inner.listeners).len())
            .field("seq", &self.inner.seq.load(Ordering::SeqCst))
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Listeners must not block.
    pub fn subscribe(&self, listener: impl Fn(&RunEvent) + Send + Sync + 'static) {
        lock(&self.inner.listeners).push(Arc::new(listener));
    }

    /// Receive events on a channel instead of a callback.
    pub fn channel(&self) -> mpsc::UnboundedReceiver<RunEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.channels).push(tx);
        rx
    }

    pub(crate) fn emit(&self, run_id: RunId, payload: RunEventPayload) {
        let event = RunEvent {
            run_id,
            seq: self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1,
            timestamp: Utc::now(),
            payload,
        };
        let listeners = lock(&self.inner.listeners).clone();
        for listener in listeners {
            listener(&event);
        }
        lock(&self.inner.channels).retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Stamps events with the run they belong to.
#[derive(Debug, Clone)]
pub(super) struct RunEventEmitter {
    run_id: RunId,
    bus: EventBus,
}

impl RunEventEmitter {
    pub(super) fn new(run_id: RunId, bus: EventBus) -> Self {
        Self { run_id, bus }
    }

    pub(super) fn emit(&self, payload: RunEventPayload) {
        self.bus.emit(self.run_id, payload);
    }

    pub(super) fn lifecycle(&self, lifecycle: RunLifecycle) {
        self.emit(RunEventPayload::Lifecycle { lifecycle });
    }
}
