//! Mock implementations for testing.
//!
//! Test doubles for the MCP seams: notification sinks and tool executors.

use async_trait::async_trait;
use mcpbridge_mcp::{
    JsonRpcNotification, McpError, McpResult, McpTool, NotificationSink, ToolArguments,
    ToolCallResult, ToolExecutor,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A sink that keeps every notification it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    notifications: Arc<Mutex<Vec<JsonRpcNotification>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded notifications.
    pub fn notifications(&self) -> Vec<JsonRpcNotification> {
        self.notifications.lock().unwrap().clone()
    }

    /// Params of every recorded notification.
    pub fn params(&self) -> Vec<Value> {
        self.notifications()
            .into_iter()
            .filter_map(|n| n.params)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send_notification(&self, notification: JsonRpcNotification) -> McpResult<()> {
        self.notifications.lock().unwrap().push(notification);
        Ok(())
    }
}

/// A sink whose transport is always broken. Counts delivery attempts.
#[derive(Debug, Clone, Default)]
pub struct FailingSink {
    attempts: Arc<Mutex<usize>>,
}

impl FailingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl NotificationSink for FailingSink {
    async fn send_notification(&self, _notification: JsonRpcNotification) -> McpResult<()> {
        *self.attempts.lock().unwrap() += 1;
        Err(McpError::connection_failed("sink unavailable"))
    }
}

/// A recorded tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: ToolArguments,
}

/// How a mock tool answers.
#[derive(Debug, Clone)]
enum ToolBehavior {
    Reply(ToolCallResult),
    Fail(String),
}

/// A tool executor with canned answers that records every call.
///
/// # Example
///
/// ```rust
/// use mcpbridge_test_utils::mocks::RecordingToolExecutor;
///
/// let tools = RecordingToolExecutor::new()
///     .with_tool("format_code", "Format source code", "formatted");
/// assert!(tools.invocations().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingToolExecutor {
    tools: Vec<McpTool>,
    behaviors: HashMap<String, ToolBehavior>,
    list_error: Option<String>,
    invocations: Arc<Mutex<Vec<ToolInvocation>>>,
}

impl RecordingToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(mut self, name: &str, description: &str, behavior: ToolBehavior) -> Self {
        self.tools.push(McpTool {
            name: name.to_string(),
            description: Some(description.to_string()),
            input_schema: Some(json!({"type": "object", "properties": {}})),
        });
        self.behaviors.insert(name.to_string(), behavior);
        self
    }

    /// Add a tool answering with `output`.
    pub fn with_tool(self, name: &str, description: &str, output: &str) -> Self {
        self.register(name, description, ToolBehavior::Reply(ToolCallResult::text(output)))
    }

    /// Add a tool reporting an error result.
    pub fn with_error_result(self, name: &str, message: &str) -> Self {
        self.register(name, "", ToolBehavior::Reply(ToolCallResult::error(message)))
    }

    /// Add a tool whose execution fails outright.
    pub fn with_failing_tool(self, name: &str, message: &str) -> Self {
        self.register(name, "", ToolBehavior::Fail(message.to_string()))
    }

    /// Make tool listing fail.
    pub fn with_list_error(mut self, message: &str) -> Self {
        self.list_error = Some(message.to_string());
        self
    }

    /// Get all recorded invocations, in call order.
    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Names of the invoked tools, in call order.
    pub fn invoked_names(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.name).collect()
    }
}

#[async_trait]
impl ToolExecutor for RecordingToolExecutor {
    async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
        match &self.list_error {
            Some(message) => Err(McpError::connection_failed(message.clone())),
            None => Ok(self.tools.clone()),
        }
    }

    async fn call_tool(&self, name: &str, arguments: ToolArguments) -> McpResult<ToolCallResult> {
        self.invocations.lock().unwrap().push(ToolInvocation {
            name: name.to_string(),
            arguments,
        });
        match self.behaviors.get(name) {
            Some(ToolBehavior::Reply(result)) => Ok(result.clone()),
            Some(ToolBehavior::Fail(message)) => Err(McpError::tool_error(message.clone())),
            None => Err(McpError::ToolNotFound(name.to_string())),
        }
    }
}
