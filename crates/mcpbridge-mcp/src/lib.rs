//! Model Context Protocol (MCP) plumbing for mcpbridge.
//!
//! This crate holds the MCP pieces the bridge depends on:
//!
//! - **protocol**: JSON-RPC notifications, tool descriptors and results, and
//!   progress notifications
//! - **sink**: where outbound notifications go
//! - **tools**: the tool listing/execution seam and an in-process registry
//!
//! # Example
//!
//! ```
//! use mcpbridge_mcp::{ClosureHandler, ToolBuilder, ToolExecutor, ToolRegistry};
//!
//! # async fn example() -> mcpbridge_mcp::McpResult<()> {
//! let registry = ToolRegistry::new().with_tool(
//!     ToolBuilder::new("ping")
//!         .description("Reply with pong")
//!         .build(ClosureHandler::new(|_| Ok("pong".to_string()))),
//! );
//!
//! let result = registry.call_tool("ping", Default::default()).await?;
//! assert_eq!(result.text_content(), "pong");
//! # Ok(())
//! # }
//! ```

mod error;
pub mod protocol;
pub mod sink;
pub mod tools;

pub use error::{McpError, McpResult};
pub use protocol::{
    JsonRpcNotification, McpTool, ProgressNotification, ProgressToken, ToolArguments,
    ToolCallResult, ToolContent, METHOD_PROGRESS,
};
pub use sink::{ChannelSink, NotificationSink, WriterSink};
pub use tools::{ClosureHandler, RegisteredTool, ToolBuilder, ToolExecutor, ToolHandler, ToolRegistry};
