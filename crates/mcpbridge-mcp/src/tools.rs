//! Tool listing and execution.
//!
//! [`ToolExecutor`] is the seam the chat loop talks to: it lists the tools a
//! model may call and executes them by name. [`ToolRegistry`] is the
//! in-process implementation, built from named tools with async handlers.

use crate::error::{McpError, McpResult};
use crate::protocol::{McpTool, ToolArguments, ToolCallResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Lists and executes tools on behalf of a model.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// List the tools available for calling.
    async fn list_tools(&self) -> McpResult<Vec<McpTool>>;

    /// Execute a tool by name.
    ///
    /// A failure inside the tool is reported as a result with `is_error` set;
    /// `Err` is reserved for the tool being unreachable or unknown.
    async fn call_tool(&self, name: &str, arguments: ToolArguments) -> McpResult<ToolCallResult>;
}

/// Handler behind a registered tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with given arguments.
    async fn call(&self, arguments: ToolArguments) -> Result<String, String>;
}

/// A tool registered in a [`ToolRegistry`].
#[derive(Clone)]
pub struct RegisteredTool {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON Schema for parameters.
    pub parameters: Value,
    handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

impl RegisteredTool {
    fn descriptor(&self) -> McpTool {
        McpTool {
            name: self.name.clone(),
            description: Some(self.description.clone()),
            input_schema: Some(self.parameters.clone()),
        }
    }
}

/// Builder for [`RegisteredTool`].
pub struct ToolBuilder {
    name: String,
    description: String,
    parameters: Value,
}

impl ToolBuilder {
    /// Create a new tool builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    /// Set the tool description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the parameters schema.
    pub fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Build the tool with a handler.
    pub fn build(self, handler: impl ToolHandler + 'static) -> RegisteredTool {
        RegisteredTool {
            name: self.name,
            description: self.description,
            parameters: self.parameters,
            handler: Arc::new(handler),
        }
    }
}

/// Handler that wraps a synchronous closure.
pub struct ClosureHandler<F>
where
    F: Fn(ToolArguments) -> Result<String, String> + Send + Sync,
{
    f: F,
}

impl<F> ClosureHandler<F>
where
    F: Fn(ToolArguments) -> Result<String, String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> ToolHandler for ClosureHandler<F>
where
    F: Fn(ToolArguments) -> Result<String, String> + Send + Sync,
{
    async fn call(&self, arguments: ToolArguments) -> Result<String, String> {
        (self.f)(arguments)
    }
}

/// In-process registry of tools, listed in name order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: RegisteredTool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Builder-style registration.
    pub fn with_tool(mut self, tool: RegisteredTool) -> Self {
        self.register(tool);
        self
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
        Ok(self.tools.values().map(RegisteredTool::descriptor).collect())
    }

    async fn call_tool(&self, name: &str, arguments: ToolArguments) -> McpResult<ToolCallResult> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;

        debug!(tool = %name, args = arguments.len(), "Calling registered tool");

        Ok(match tool.handler.call(arguments).await {
            Ok(output) => ToolCallResult::text(output),
            Err(message) => ToolCallResult::error(message),
        })
    }
}
