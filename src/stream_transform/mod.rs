//! Stream transformations applied to a run's part stream before it is
//! multiplexed.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use regex::Regex;

use crate::types::StreamPart;

/// Trait for transforming a stream of parts.
///
/// Implementations must pass the terminal `finish`/`error` part through
/// unchanged and must not emit anything after it.
pub trait StreamTransform: Send + Sync {
    /// Transform the stream.
    fn transform(&self, stream: BoxStream<'static, StreamPart>) -> BoxStream<'static, StreamPart>;
}

/// Drop parts that do not satisfy a predicate. Terminal parts always pass.
pub struct FilterTransform {
    predicate: Arc<dyn Fn(&StreamPart) -> bool + Send + Sync>,
}

impl FilterTransform {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&StreamPart) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl StreamTransform for FilterTransform {
    fn transform(&self, stream: BoxStream<'static, StreamPart>) -> BoxStream<'static, StreamPart> {
        let predicate = self.predicate.clone();
        let transformed = async_stream::stream! {
            let mut inner = stream;
            while let Some(part) = inner.next().await {
                if part.is_terminal() || (predicate)(&part) {
                    yield part;
                }
            }
        };
        Box::pin(transformed)
    }
}

/// Map the text of every text delta.
pub struct MapTextTransform {
    mapper: Arc<dyn Fn(String) -> String + Send + Sync>,
}

impl MapTextTransform {
    pub fn new<F>(mapper: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        Self {
            mapper: Arc::new(mapper),
        }
    }
}

impl StreamTransform for MapTextTransform {
    fn transform(&self, stream: BoxStream<'static, StreamPart>) -> BoxStream<'static, StreamPart> {
        let mapper = self.mapper.clone();
        stream
            .map(move |part| match part {
                StreamPart::TextDelta { id, delta } => StreamPart::TextDelta {
                    id,
                    delta: (mapper)(delta),
                },
                other => other,
            })
            .boxed()
    }
}

/// How [`SmoothStream`] splits buffered text.
#[derive(Debug, Clone)]
pub enum Chunking {
    /// Up to and including the whitespace after a word.
    Word,
    /// Up to and including a newline.
    Line,
    /// Up to the end of the first match.
    Pattern(Regex),
}

impl Chunking {
    fn regex(&self) -> Option<Regex> {
        match self {
            Self::Word => Regex::new(r"\S+\s+").ok(),
            Self::Line => Regex::new(r"\n+").ok(),
            Self::Pattern(regex) => Some(regex.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Channel {
    Text(String),
    Reasoning(String),
}

impl Channel {
    fn part(&self, delta: String) -> StreamPart {
        match self {
            Self::Text(id) => StreamPart::TextDelta {
                id: id.clone(),
                delta,
            },
            Self::Reasoning(id) => StreamPart::ReasoningDelta {
                id: id.clone(),
                delta,
            },
        }
    }
}

/// Re-chunk text and reasoning deltas into words or lines, optionally pacing
/// them. Buffered text is flushed before any other part and when the delta id
/// changes.
#[derive(Debug, Clone)]
pub struct SmoothStream {
    chunking: Chunking,
    delay: Option<Duration>,
}

impl Default for SmoothStream {
    fn default() -> Self {
        Self {
            chunking: Chunking::Word,
            delay: Some(Duration::from_millis(10)),
        }
    }
}

impl SmoothStream {
    pub fn new(chunking: Chunking, delay: Option<Duration>) -> Self {
        Self { chunking, delay }
    }
}

fn chunk_end(regex: &Regex, buffer: &str) -> Option<usize> {
    regex.find(buffer).map(|m| m.end()).filter(|end| *end > 0)
}

impl StreamTransform for SmoothStream {
    fn transform(&self, stream: BoxStream<'static, StreamPart>) -> BoxStream<'static, StreamPart> {
        let Some(regex) = self.chunking.regex() else {
            return stream;
        };
        let delay = self.delay;
        let transformed = async_stream::stream! {
            let mut inner = stream;
            let mut buffer = String::new();
            let mut channel: Option<Channel> = None;

            while let Some(part) = inner.next().await {
                let (next, delta) = match part {
                    StreamPart::TextDelta { id, delta } => (Channel::Text(id), delta),
                    StreamPart::ReasoningDelta { id, delta } => (Channel::Reasoning(id), delta),
                    other => {
                        if let Some(current) = channel.take() {
                            if !buffer.is_empty() {
                                yield current.part(std::mem::take(&mut buffer));
                            }
                        }
                        yield other;
                        continue;
                    }
                };

                if channel.as_ref() != Some(&next) {
                    if let Some(previous) = channel.take() {
                        if !buffer.is_empty() {
                            yield previous.part(std::mem::take(&mut buffer));
                        }
                    }
                }
                buffer.push_str(&delta);

                while let Some(end) = chunk_end(&regex, &buffer) {
                    let chunk: String = buffer.drain(..end).collect();
                    yield next.part(chunk);
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                }
                channel = Some(next);
            }

            if let Some(current) = channel {
                if !buffer.is_empty() {
                    yield current.part(buffer);
                }
            }
        };
        Box::pin(transformed)
    }
}

/// Apply transforms in order.
pub fn apply_transforms(
    stream: BoxStream<'static, StreamPart>,
    transforms: &[Arc<dyn StreamTransform>],
) -> BoxStream<'static, StreamPart> {
    transforms
        .iter()
        .fold(stream, |stream, transform| transform.transform(stream))
}
