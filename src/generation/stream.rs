//! Streaming text generation: one run, many views.

use futures::stream::BoxStream;
use tokio::sync::mpsc;

use super::text::GenerateTextResult;
use crate::error::BraidError;
use crate::multiplex::Multiplexer;
use crate::response::{part_stream_response, text_stream_response, ui_stream_response, StreamResponse};
use crate::step_loop::{run_step_loop, RunHandle, RunRequest};
use crate::stream_transform::apply_transforms;
use crate::types::{RunId, Step, StreamPart, Usage};
use crate::ui::{ui_message_stream, UiChunk, UiStreamOptions};

/// Start a run and expose its output through independent views.
///
/// Nothing is pulled from the model until some view, `consume` or `output`
/// is polled. Must be called from within a tokio runtime.
pub fn stream_text(request: RunRequest) -> StreamTextResult {
    let transforms = request.transforms.clone();
    let buffer = request.buffer;
    let (parts, handle) = run_step_loop(request);
    let parts = apply_transforms(parts, &transforms);
    let mux = Multiplexer::new(parts, buffer, Some(handle.abort_signal()));
    StreamTextResult { mux, handle }
}

/// A streaming run. Views created before parts are pulled see every part;
/// later views start at the next part.
#[derive(Debug, Clone)]
pub struct StreamTextResult {
    mux: Multiplexer,
    handle: RunHandle,
}

impl StreamTextResult {
    pub fn run_id(&self) -> RunId {
        self.handle.run_id()
    }

    pub fn handle(&self) -> &RunHandle {
        &self.handle
    }

    /// Cancel the run. Every view ends with an abort `error` part.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Every part, in order.
    pub fn full_stream(&self) -> BoxStream<'static, StreamPart> {
        self.mux.subscribe().into_stream()
    }

    /// Text deltas only.
    pub fn text_stream(&self) -> BoxStream<'static, String> {
        self.mux.subscribe_text().into_stream()
    }

    pub fn ui_message_stream(&self, options: UiStreamOptions) -> BoxStream<'static, UiChunk> {
        ui_message_stream(self.full_stream(), options)
    }

    /// A copy of every part from now on, for observers that must not drive
    /// the run.
    pub fn tee(&self) -> mpsc::UnboundedReceiver<StreamPart> {
        self.mux.tee()
    }

    pub fn to_part_stream_response(&self) -> StreamResponse {
        part_stream_response(self.full_stream())
    }

    pub fn to_ui_stream_response(&self, options: UiStreamOptions) -> StreamResponse {
        ui_stream_response(self.ui_message_stream(options))
    }

    pub fn to_text_stream_response(&self) -> StreamResponse {
        text_stream_response(self.text_stream())
    }

    /// Drive the run to its end without reading it.
    pub async fn consume(&self) {
        self.mux.drain().await;
    }

    /// Wait for the run and collect its result, or the error that ended it.
    pub async fn output(&self) -> Result<GenerateTextResult, BraidError> {
        self.consume().await;
        let run = self.handle.result().await?;
        GenerateTextResult::try_from(run)
    }

    pub async fn text(&self) -> Result<String, BraidError> {
        Ok(self.output().await?.text)
    }

    pub async fn steps(&self) -> Result<Vec<Step>, BraidError> {
        Ok(self.output().await?.steps)
    }

    pub async fn total_usage(&self) -> Result<Option<Usage>, BraidError> {
        Ok(self.output().await?.total_usage)
    }
}
