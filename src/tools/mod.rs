//! Tool system for function calling.

pub mod invocation;
pub mod schema;
pub mod tool;

pub use invocation::{InvalidTransition, ToolInvocationState};
pub use schema::{JsonSchema, ObjectSchemaBuilder, Schema, SchemaError, TypedSchema};
pub use tool::{AgentTool, PartWriter, Tool, ToolContext, ToolOutput};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A tool as declared to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The tools available to a run, in registration order.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later tool with the same name replaces the earlier one.
    pub fn with(self, tool: impl Tool + 'static) -> Self {
        self.with_arc(Arc::new(tool))
    }

    pub fn with_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.input_schema().to_json_schema(),
            })
            .collect()
    }

    /// Definitions limited to `active` names, or all of them when `None`.
    /// Unknown names are ignored.
    pub fn active_definitions(&self, active: Option<&[String]>) -> Vec<ToolDefinition> {
        let mut definitions = self.definitions();
        if let Some(active) = active {
            definitions.retain(|d| active.iter().any(|name| *name == d.name));
        }
        definitions
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet").field("tools", &self.names()).finish()
    }
}
