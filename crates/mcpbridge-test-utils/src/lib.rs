//! Testing utilities and mocks for mcpbridge.
//!
//! This crate provides common testing infrastructure used across the mcpbridge workspace:
//!
//! - **Providers**: A scripted chat provider that records requests
//! - **Mocks**: Recording notification sinks and tool executors
//!
//! # Example Usage
//!
//! ```rust
//! use mcpbridge_test_utils::{RecordingProvider, RecordingToolExecutor};
//! use serde_json::json;
//!
//! let provider = RecordingProvider::new("scripted")
//!     .with_tool_call("call_1", "echo", json!({"message": "hi"}))
//!     .with_response("Done");
//! let tools = RecordingToolExecutor::new().with_tool("echo", "Echo a message", "hi");
//! # let _ = (provider, tools);
//! ```

pub mod mocks;
pub mod providers;

// Re-export commonly used items
pub use mocks::{FailingSink, RecordingSink, RecordingToolExecutor, ToolInvocation};
pub use providers::{ProviderResponse, RecordedCall, RecordingProvider};

use mcpbridge_util::log::{LogConfig, LogLevel};

/// Install a tracing subscriber for tests. Safe to call more than once.
pub fn init_tracing() {
    mcpbridge_util::log::init(LogConfig {
        print: true,
        level: LogLevel::Debug,
        ..Default::default()
    });
}
