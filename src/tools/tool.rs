//! Tool trait, execution context, and closure-based tool wrapper.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use super::schema::{JsonSchema, Schema, TypedSchema};
use crate::abort::AbortSignal;
use crate::error::ToolCallError;
use crate::types::StreamPart;

/// What a tool returns: one value, or a stream of values where every item but
/// the last is a preliminary result.
pub enum ToolOutput {
    Value(Value),
    Stream(BoxStream<'static, Result<Value, ToolCallError>>),
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl std::fmt::Debug for ToolOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Write half for parts a tool merges into the run's output stream.
#[derive(Debug, Clone, Default)]
pub struct PartWriter {
    tx: Option<mpsc::UnboundedSender<StreamPart>>,
}

impl PartWriter {
    pub(crate) fn new(tx: mpsc::UnboundedSender<StreamPart>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A writer that discards everything.
    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Queue one part. Returns false once the run stopped listening.
    pub fn write(&self, part: StreamPart) -> bool {
        match &self.tx {
            Some(tx) => tx.send(part).is_ok(),
            None => false,
        }
    }

    /// Forward a nested part stream until it ends or the run stops listening.
    pub async fn merge(&self, mut parts: BoxStream<'_, StreamPart>) {
        while let Some(part) = parts.next().await {
            if !self.write(part) {
                break;
            }
        }
    }
}

/// Context available during tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Fires when the run is aborted.
    pub abort: AbortSignal,
    pub writer: PartWriter,
}

impl ToolContext {
    /// A context detached from any run.
    pub fn new(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            abort: AbortSignal::new(),
            writer: PartWriter::disconnected(),
        }
    }

    /// Merge a nested part stream into the run's output.
    pub async fn merge(&self, parts: BoxStream<'_, StreamPart>) {
        self.writer.merge(parts).await
    }
}

/// Core tool trait. Implement it for tools that need more than a closure.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Schema the input must satisfy before `execute` is called.
    fn input_schema(&self) -> &JsonSchema;

    /// Whether this call must be approved by the caller first.
    fn needs_approval(&self, _input: &Value) -> bool {
        false
    }

    /// A failing fatal tool ends the run instead of producing `tool-error` content.
    fn is_fatal(&self) -> bool {
        false
    }

    /// Execute the tool with validated input.
    async fn execute(&self, input: Value, ctx: ToolContext) -> Result<ToolOutput, ToolCallError>;
}

type ToolHandler =
    dyn Fn(Value, ToolContext) -> BoxFuture<'static, Result<ToolOutput, ToolCallError>> + Send + Sync;

type ApprovalPredicate = dyn Fn(&Value) -> bool + Send + Sync;

/// Closure-based tool for quick tool creation.
pub struct AgentTool {
    name: String,
    description: String,
    schema: JsonSchema,
    handler: Arc<ToolHandler>,
    approval: Option<Arc<ApprovalPredicate>>,
    fatal: bool,
}

impl AgentTool {
    /// Create a tool from a closure returning one value.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: JsonSchema,
        handler: F,
    ) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolCallError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self::from_handler(
            name,
            description,
            schema,
            Arc::new(move |input: Value, ctx: ToolContext| {
                let fut = handler(input, ctx);
                async move { fut.await.map(ToolOutput::Value) }.boxed()
            }),
        )
    }

    /// Create a tool whose closure yields preliminary results; the last item is final.
    pub fn streaming<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: JsonSchema,
        handler: F,
    ) -> Self
    where
        F: Fn(Value, ToolContext) -> BoxStream<'static, Result<Value, ToolCallError>>
            + Send
            + Sync
            + 'static,
    {
        Self::from_handler(
            name,
            description,
            schema,
            Arc::new(move |input: Value, ctx: ToolContext| {
                let stream = handler(input, ctx);
                async move { Ok(ToolOutput::Stream(stream)) }.boxed()
            }),
        )
    }

    /// Create a tool whose closure receives input deserialized into `T`.
    pub fn typed<T, F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: TypedSchema<T>,
        handler: F,
    ) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolCallError>> + Send + 'static,
    {
        let json = schema.json_schema().clone();
        let handler = Arc::new(handler);
        Self::from_handler(
            name,
            description,
            json,
            Arc::new(move |input: Value, ctx: ToolContext| match schema.validate(&input) {
                Ok(typed) => {
                    let fut = handler(typed, ctx);
                    async move { fut.await.map(ToolOutput::Value) }.boxed()
                }
                Err(e) => {
                    futures::future::ready(Err(ToolCallError::InputValidation(e.to_string()))).boxed()
                }
            }),
        )
    }

    fn from_handler(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: JsonSchema,
        handler: Arc<ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler,
            approval: None,
            fatal: false,
        }
    }

    /// Require approval for every call.
    pub fn with_approval(self) -> Self {
        self.with_approval_when(|_| true)
    }

    /// Require approval for calls whose input matches `predicate`.
    pub fn with_approval_when(
        mut self,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.approval = Some(Arc::new(predicate));
        self
    }

    /// Mark the tool fatal: its failures end the run.
    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> &JsonSchema {
        &self.schema
    }

    fn needs_approval(&self, input: &Value) -> bool {
        self.approval.as_ref().is_some_and(|p| p(input))
    }

    fn is_fatal(&self) -> bool {
        self.fatal
    }

    async fn execute(&self, input: Value, ctx: ToolContext) -> Result<ToolOutput, ToolCallError> {
        (self.handler)(input, ctx).await
    }
}

impl std::fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("fatal", &self.fatal)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[tokio::test]
    async fn closure_tool_returns_a_value() {
        let tool = AgentTool::new("echo", "echo input", JsonSchema::empty(), |input, _ctx| async move {
            Ok(json!({ "echo": input }))
        });
        let output = tool
            .execute(json!({ "a": 1 }), ToolContext::new("c1", "echo"))
            .await
            .unwrap();
        assert!(matches!(output, ToolOutput::Value(v) if v == json!({ "echo": { "a": 1 } })));
        assert!(!tool.needs_approval(&json!({})));
    }

    #[tokio::test]
    async fn typed_tool_rejects_input_it_cannot_deserialize() {
        #[derive(Deserialize)]
        struct Args {
            n: u32,
        }
        let schema = TypedSchema::<Args>::new(JsonSchema::object().integer("n", "count", true).build());
        let tool = AgentTool::typed("double", "double n", schema, |args: Args, _ctx| async move {
            Ok(json!(args.n * 2))
        });

        let ok = tool.execute(json!({ "n": 4 }), ToolContext::new("c1", "double")).await;
        assert!(matches!(ok, Ok(ToolOutput::Value(v)) if v == json!(8)));

        let err = tool.execute(json!({ "n": -1 }), ToolContext::new("c2", "double")).await;
        assert!(matches!(err, Err(ToolCallError::InputValidation(_))));
    }

    #[test]
    fn approval_predicate_inspects_input() {
        let tool = AgentTool::new("pay", "send money", JsonSchema::empty(), |_, _| async { Ok(json!(null)) })
            .with_approval_when(|input| input["amount"].as_u64().unwrap_or(0) > 100);
        assert!(tool.needs_approval(&json!({ "amount": 500 })));
        assert!(!tool.needs_approval(&json!({ "amount": 5 })));
    }

    #[tokio::test]
    async fn writer_forwards_until_receiver_drops() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let writer = PartWriter::new(tx);
        assert!(writer.write(StreamPart::text_delta("n", "nested")));
        assert_eq!(rx.recv().await, Some(StreamPart::text_delta("n", "nested")));
        drop(rx);
        assert!(!writer.write(StreamPart::text_delta("n", "lost")));
        assert!(!PartWriter::disconnected().write(StreamPart::text_delta("n", "x")));
    }
}
