//! Structured output: typed objects and arrays parsed from model text.

use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use serde_json::{json, Value};

use super::stream::{stream_text, StreamTextResult};
use super::text::GenerateTextResult;
use crate::error::BraidError;
use crate::partial_json::parse_partial;
use crate::step_loop::RunRequest;
use crate::tools::Schema;
use crate::types::{ModelMessage, ResponseFormat};

/// Shape of the structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOutput {
    /// One value matching the schema.
    Object,
    /// An array whose elements each match the schema.
    Array,
}

/// A structured-output run. The schema describes one object, or one
/// element when the output is an array.
pub struct StreamObjectResult<T> {
    inner: StreamTextResult,
    schema: Arc<dyn Schema<T>>,
    output: ObjectOutput,
}

impl<T> std::fmt::Debug for StreamObjectResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamObjectResult")
            .field("run_id", &self.inner.run_id())
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

/// A typed object and the run that produced it.
#[derive(Debug, Clone)]
pub struct GenerateObjectResult<T> {
    pub object: T,
    /// Model text the object was parsed from, fences removed.
    pub text: String,
    pub result: GenerateTextResult,
}

/// Stream a single object matching `schema`.
pub fn stream_object<T: Send + 'static>(
    request: RunRequest,
    schema: Arc<dyn Schema<T>>,
) -> StreamObjectResult<T> {
    start(request, schema, ObjectOutput::Object)
}

/// Stream an array whose elements match `element_schema`.
pub fn stream_array<T: Send + 'static>(
    request: RunRequest,
    element_schema: Arc<dyn Schema<T>>,
) -> StreamObjectResult<T> {
    start(request, element_schema, ObjectOutput::Array)
}

/// Generate a single object matching `schema`.
pub async fn generate_object<T: Send + 'static>(
    request: RunRequest,
    schema: Arc<dyn Schema<T>>,
) -> Result<GenerateObjectResult<T>, BraidError> {
    stream_object(request, schema).output().await
}

fn start<T>(
    mut request: RunRequest,
    schema: Arc<dyn Schema<T>>,
    output: ObjectOutput,
) -> StreamObjectResult<T> {
    let json_schema = match output {
        ObjectOutput::Object => schema.to_json_schema(),
        ObjectOutput::Array => json!({"type": "array", "items": schema.to_json_schema()}),
    };
    if request.provider.capabilities().supports_json_schema {
        request.settings.response_format = Some(ResponseFormat::JsonSchema {
            schema: json_schema,
            name: match output {
                ObjectOutput::Object => "object".to_string(),
                ObjectOutput::Array => "array".to_string(),
            },
        });
    } else {
        let schema_text = serde_json::to_string_pretty(&json_schema).unwrap_or_default();
        request.messages.insert(
            0,
            ModelMessage::system(format!(
                "Respond with ONLY valid JSON (no markdown, no explanation) matching this schema:\n{schema_text}"
            )),
        );
    }
    StreamObjectResult {
        inner: stream_text(request),
        schema,
        output,
    }
}

impl<T: Send + 'static> StreamObjectResult<T> {
    pub fn text_result(&self) -> &StreamTextResult {
        &self.inner
    }

    pub fn abort(&self) {
        self.inner.abort();
    }

    /// Best-effort partial values, emitted only when the value changes.
    /// Partial values are not validated.
    pub fn partial_object_stream(&self) -> BoxStream<'static, Value> {
        let mut text = self.inner.text_stream();
        let stream = async_stream::stream! {
            let mut buffer = String::new();
            let mut last: Option<Value> = None;
            while let Some(delta) = text.next().await {
                buffer.push_str(&delta);
                let Some(value) = parse_partial(&strip_code_fences(&buffer)).into_value() else {
                    continue;
                };
                if last.as_ref() != Some(&value) {
                    last = Some(value.clone());
                    yield value;
                }
            }
        };
        stream.boxed()
    }

    /// Validated array elements, each emitted once it can no longer change.
    /// Ends with an error if an element fails validation, the final text is
    /// not an array, or the run fails.
    pub fn element_stream(&self) -> BoxStream<'static, Result<T, BraidError>> {
        let mut text = self.inner.text_stream();
        let inner = self.inner.clone();
        let schema = self.schema.clone();
        let output = self.output;
        let stream = async_stream::stream! {
            if output != ObjectOutput::Array {
                yield Err(BraidError::Configuration(
                    "element streams require array output".to_string(),
                ));
                return;
            }
            let mut buffer = String::new();
            let mut cursor = ElementCursor::default();
            while let Some(delta) = text.next().await {
                buffer.push_str(&delta);
                let Some(value) = parse_partial(&strip_code_fences(&buffer)).into_value() else {
                    continue;
                };
                for element in cursor.settled(&value, false) {
                    match validate(schema.as_ref(), element) {
                        Ok(item) => yield Ok(item),
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }
            }

            if let Err(err) = inner.output().await {
                yield Err(err);
                return;
            }
            let value = match parse_final(&buffer) {
                Ok(value) => value,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            if !value.is_array() {
                yield Err(not_an_array(value));
                return;
            }
            for element in cursor.settled(&value, true) {
                match validate(schema.as_ref(), element) {
                    Ok(item) => yield Ok(item),
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
        };
        stream.boxed()
    }

    /// Wait for the run and parse the final object.
    pub async fn output(&self) -> Result<GenerateObjectResult<T>, BraidError> {
        if self.output != ObjectOutput::Object {
            return Err(BraidError::Configuration(
                "array output is read with `elements`".to_string(),
            ));
        }
        let result = self.inner.output().await?;
        let text = strip_code_fences(&result.text);
        let value = parse_final(&result.text)?;
        let object = validate(self.schema.as_ref(), value)?;
        Ok(GenerateObjectResult {
            object,
            text,
            result,
        })
    }

    /// Wait for the run and parse every array element.
    pub async fn elements(&self) -> Result<Vec<T>, BraidError> {
        if self.output != ObjectOutput::Array {
            return Err(BraidError::Configuration(
                "object output is read with `output`".to_string(),
            ));
        }
        let result = self.inner.output().await?;
        match parse_final(&result.text)? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| validate(self.schema.as_ref(), item))
                .collect(),
            other => Err(not_an_array(other)),
        }
    }
}

/// Tracks which array elements have been emitted. Every element but the
/// last is settled while streaming; the last settles when the text ends.
#[derive(Debug, Default)]
struct ElementCursor {
    emitted: usize,
}

impl ElementCursor {
    fn settled(&mut self, value: &Value, done: bool) -> Vec<Value> {
        let Value::Array(items) = value else {
            return Vec::new();
        };
        let settled = if done {
            items.len()
        } else {
            items.len().saturating_sub(1)
        };
        if settled <= self.emitted {
            return Vec::new();
        }
        let ready = items[self.emitted..settled].to_vec();
        self.emitted = settled;
        ready
    }
}

fn parse_final(text: &str) -> Result<Value, BraidError> {
    let stripped = strip_code_fences(text);
    if stripped.is_empty() {
        return Err(BraidError::NoObjectGenerated {
            message: "model returned no text".to_string(),
            text: None,
        });
    }
    serde_json::from_str(&stripped).map_err(|e| BraidError::NoObjectGenerated {
        message: format!("could not parse model text as JSON: {e}"),
        text: Some(stripped),
    })
}

fn validate<T>(schema: &dyn Schema<T>, value: Value) -> Result<T, BraidError> {
    schema
        .validate(&value)
        .map_err(|e| BraidError::TypeValidation {
            message: e.to_string(),
            value,
        })
}

fn not_an_array(value: Value) -> BraidError {
    BraidError::TypeValidation {
        message: "$: expected an array".to_string(),
        value,
    }
}

/// Strip markdown code fences around a JSON response. An unterminated
/// fence is stripped too, so this also works on streaming prefixes.
pub(crate) fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim().to_string()
}
