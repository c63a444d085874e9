//! The UI-message view of a run.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;

use super::chunk::{to_ui_chunks, UiChunk, UiMapOptions};
use super::message::{generate_message_id, UiMessage, UiMessageBuilder, UiRole};
use crate::error::BraidError;
use crate::types::StreamPart;

/// What `on_finish` receives once the UI stream has ended.
#[derive(Debug, Clone, PartialEq)]
pub struct UiFinishEvent {
    /// The original messages with the response message appended or replaced.
    pub messages: Vec<UiMessage>,
    pub response_message: UiMessage,
    /// The response extended the last original assistant message.
    pub is_continuation: bool,
    pub is_aborted: bool,
}

pub type UiFinishHook =
    Arc<dyn Fn(UiFinishEvent) -> BoxFuture<'static, Result<(), BraidError>> + Send + Sync>;

/// Options for [`ui_message_stream`].
#[derive(Clone, Default)]
pub struct UiStreamOptions {
    pub map: UiMapOptions,
    /// The conversation the client holds, used to correlate the response.
    pub original_messages: Vec<UiMessage>,
    /// Id for a new response message. Generated when unset.
    pub message_id: Option<String>,
    pub message_metadata: Option<Value>,
    pub on_finish: Option<UiFinishHook>,
}

impl std::fmt::Debug for UiStreamOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiStreamOptions")
            .field("map", &self.map)
            .field("original_messages", &self.original_messages.len())
            .field("message_id", &self.message_id)
            .field("on_finish", &self.on_finish.is_some())
            .finish()
    }
}

impl UiStreamOptions {
    pub fn with_original_messages(mut self, messages: Vec<UiMessage>) -> Self {
        self.original_messages = messages;
        self
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_message_metadata(mut self, metadata: Value) -> Self {
        self.message_metadata = Some(metadata);
        self
    }

    pub fn with_send_reasoning(mut self, send: bool) -> Self {
        self.map.send_reasoning = send;
        self
    }

    pub fn with_send_sources(mut self, send: bool) -> Self {
        self.map.send_sources = send;
        self
    }

    pub fn with_on_finish<F>(mut self, hook: F) -> Self
    where
        F: Fn(UiFinishEvent) -> BoxFuture<'static, Result<(), BraidError>> + Send + Sync + 'static,
    {
        self.on_finish = Some(Arc::new(hook));
        self
    }
}

/// Map a part stream to UI chunks, opened by a `start` chunk carrying the
/// response message id.
///
/// When the last original message is from the assistant the response
/// continues it and reuses its id. `on_finish` runs once after the last chunk,
/// including after an abort. Dropping the stream before it ends skips it.
pub fn ui_message_stream(
    parts: BoxStream<'static, StreamPart>,
    options: UiStreamOptions,
) -> BoxStream<'static, UiChunk> {
    let UiStreamOptions {
        map,
        mut original_messages,
        message_id,
        message_metadata,
        on_finish,
    } = options;

    let continued = match original_messages.last() {
        Some(last) if last.role == UiRole::Assistant => original_messages.pop(),
        _ => None,
    };
    let is_continuation = continued.is_some();
    let (response_id, mut builder) = match continued {
        Some(message) => (message.id.clone(), UiMessageBuilder::new(message)),
        None => {
            let id = message_id.unwrap_or_else(generate_message_id);
            (id.clone(), UiMessageBuilder::assistant(id))
        }
    };

    let stream = async_stream::stream! {
        let mut parts = parts;
        let mut is_aborted = false;

        let start = UiChunk::Start {
            message_id: Some(response_id),
            message_metadata,
        };
        record(&mut builder, &start);
        yield start;

        while let Some(part) = parts.next().await {
            for chunk in to_ui_chunks(&part, &map) {
                is_aborted |= matches!(chunk, UiChunk::Abort);
                record(&mut builder, &chunk);
                yield chunk;
            }
        }

        if let Some(hook) = on_finish {
            let response_message = builder.into_message();
            let mut messages = original_messages;
            messages.push(response_message.clone());
            let event = UiFinishEvent {
                messages,
                response_message,
                is_continuation,
                is_aborted,
            };
            if let Err(err) = hook(event).await {
                tracing::warn!(error = %err, "ui on_finish hook failed");
            }
        }
    };
    stream.boxed()
}

fn record(builder: &mut UiMessageBuilder, chunk: &UiChunk) {
    if let Err(err) = builder.apply(chunk) {
        tracing::warn!(chunk = chunk.type_name(), error = %err, "ui chunk not applied to response message");
    }
}
