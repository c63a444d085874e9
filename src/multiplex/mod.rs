//! Fan one part stream out to independent, lazily pulled views.
//!
//! The source is polled only when some view asks for a part it does not have
//! buffered yet. Every part pulled is appended to the buffer of every view
//! that exists at that moment, so all views observe the same order. A view
//! created after parts were pulled starts at the next part.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::abort::{AbortReason, AbortSignal};
use crate::error::ErrorCategory;
use crate::types::StreamPart;
use crate::util::lock;

/// What to do when a view's buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Discard the oldest buffered part.
    #[default]
    DropOldest,
    /// End the view with a `stream` error part.
    Error,
}

/// Per-view buffering. `capacity: None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl BufferConfig {
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity),
            overflow,
        }
    }
}

#[derive(Debug, Default)]
struct ViewBuffer {
    queue: VecDeque<StreamPart>,
    /// No further parts will be appended (overflowed).
    closed: bool,
}

#[derive(Debug, Default)]
struct ViewTable {
    next_id: u64,
    buffers: HashMap<u64, ViewBuffer>,
    /// The source produced its terminal part or ended.
    finished: bool,
}

struct Shared {
    source: tokio::sync::Mutex<Option<BoxStream<'static, StreamPart>>>,
    views: Mutex<ViewTable>,
    tees: Mutex<Vec<mpsc::UnboundedSender<StreamPart>>>,
    config: BufferConfig,
    abort: Option<AbortSignal>,
}

enum Pulled {
    Part(Option<StreamPart>),
    Aborted(AbortReason),
}

impl Shared {
    /// Pull one part for `view_id` unless it already has something buffered.
    async fn pull_for(&self, view_id: Option<u64>) {
        let mut source = self.source.lock().await;

        if let Some(id) = view_id {
            let views = lock(&self.views);
            if views.buffers.get(&id).is_some_and(|b| !b.queue.is_empty()) {
                return;
            }
        }

        let Some(stream) = source.as_mut() else {
            return;
        };
        let pulled = match &self.abort {
            Some(abort) => tokio::select! {
                biased;
                _ = abort.cancelled() => Pulled::Aborted(abort.reason().unwrap_or(AbortReason::User)),
                part = stream.next() => Pulled::Part(part),
            },
            None => Pulled::Part(stream.next().await),
        };
        let part = match pulled {
            Pulled::Part(part) => part,
            Pulled::Aborted(reason) => {
                tracing::debug!(%reason, "multiplexer aborted");
                Some(StreamPart::aborted(reason))
            }
        };

        match part {
            Some(part) => {
                let terminal = part.is_terminal();
                self.distribute(part);
                if terminal {
                    *source = None;
                    self.finish();
                }
            }
            None => {
                *source = None;
                self.finish();
            }
        }
    }

    fn distribute(&self, part: StreamPart) {
        lock(&self.tees).retain(|tx| tx.send(part.clone()).is_ok());

        let mut views = lock(&self.views);
        for (id, buffer) in views.buffers.iter_mut() {
            if buffer.closed {
                continue;
            }
            if let Some(capacity) = self.config.capacity {
                if buffer.queue.len() >= capacity {
                    match self.config.overflow {
                        OverflowPolicy::DropOldest => {
                            tracing::warn!(view = id, capacity, "view buffer full, dropping oldest part");
                            buffer.queue.pop_front();
                        }
                        OverflowPolicy::Error => {
                            tracing::warn!(view = id, capacity, "view buffer overflowed");
                            buffer.queue.push_back(StreamPart::Error {
                                category: ErrorCategory::Stream,
                                message: format!("view buffer overflowed (capacity {capacity})"),
                            });
                            buffer.closed = true;
                            continue;
                        }
                    }
                }
            }
            buffer.queue.push_back(part.clone());
        }
    }

    fn finish(&self) {
        lock(&self.views).finished = true;
        lock(&self.tees).clear();
    }
}

/// Shared handle over a single part stream. Cloning shares the same source.
#[derive(Clone)]
pub struct Multiplexer {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("config", &self.shared.config)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl Multiplexer {
    /// Wrap `source`. If `abort` fires while a view waits on the source, every
    /// view receives an abort `error` part and the source is dropped.
    pub fn new(
        source: BoxStream<'static, StreamPart>,
        config: BufferConfig,
        abort: Option<AbortSignal>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                source: tokio::sync::Mutex::new(Some(source)),
                views: Mutex::new(ViewTable::default()),
                tees: Mutex::new(Vec::new()),
                config,
                abort,
            }),
        }
    }

    /// Create a view positioned at the next part to be pulled.
    pub fn subscribe(&self) -> PartView {
        let mut views = lock(&self.shared.views);
        let id = views.next_id;
        views.next_id += 1;
        views.buffers.insert(id, ViewBuffer::default());
        PartView {
            id,
            shared: self.shared.clone(),
        }
    }

    /// A view that yields only text deltas.
    pub fn subscribe_text(&self) -> TextView {
        TextView {
            view: self.subscribe(),
        }
    }

    /// An unbounded side channel receiving every part pulled from now on.
    /// It does not drive the source; it closes when the source finishes.
    pub fn tee(&self) -> mpsc::UnboundedReceiver<StreamPart> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !lock(&self.shared.views).finished {
            lock(&self.shared.tees).push(tx);
        }
        rx
    }

    /// Pull the source to completion without a view of its own.
    pub async fn drain(&self) {
        while !self.is_finished() {
            self.shared.pull_for(None).await;
        }
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.shared.views).finished
    }

    /// Number of live views.
    pub fn view_count(&self) -> usize {
        lock(&self.shared.views).buffers.len()
    }
}

/// One consumer's position in a multiplexed stream.
pub struct PartView {
    id: u64,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PartView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartView").field("id", &self.id).finish()
    }
}

impl PartView {
    /// Next part for this view, pulling the source if needed.
    pub async fn next(&mut self) -> Option<StreamPart> {
        loop {
            {
                let mut views = lock(&self.shared.views);
                let finished = views.finished;
                let buffer = views.buffers.get_mut(&self.id)?;
                if let Some(part) = buffer.queue.pop_front() {
                    return Some(part);
                }
                if buffer.closed || finished {
                    return None;
                }
            }
            self.shared.pull_for(Some(self.id)).await;
        }
    }

    /// Parts currently buffered for this view.
    pub fn buffered(&self) -> usize {
        lock(&self.shared.views)
            .buffers
            .get(&self.id)
            .map_or(0, |b| b.queue.len())
    }

    pub fn into_stream(self) -> BoxStream<'static, StreamPart> {
        futures::stream::unfold(self, |mut view| async move {
            let part = view.next().await?;
            Some((part, view))
        })
        .boxed()
    }
}

impl Drop for PartView {
    fn drop(&mut self) {
        lock(&self.shared.views).buffers.remove(&self.id);
    }
}

/// A view reduced to text deltas.
#[derive(Debug)]
pub struct TextView {
    view: PartView,
}

impl TextView {
    pub async fn next(&mut self) -> Option<String> {
        loop {
            match self.view.next().await? {
                StreamPart::TextDelta { delta, .. } => return Some(delta),
                _ => continue,
            }
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, String> {
        self.view
            .into_stream()
            .filter_map(|part| async move {
                match part {
                    StreamPart::TextDelta { delta, .. } => Some(delta),
                    _ => None,
                }
            })
            .boxed()
    }
}
