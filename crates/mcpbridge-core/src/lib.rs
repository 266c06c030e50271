//! Core logic for mcpbridge.
//!
//! This crate provides the two pieces the bridge is built around:
//! - Task tracking with progress notifications and bounded history
//! - The chat loop, which streams model output and runs requested tools
//!
//! Around them sit configuration loading (multi-source, JSONC support),
//! the error taxonomy, tool call reassembly and heuristic argument repair.

pub mod accumulator;
pub mod chat;
pub mod config;
pub mod error;
pub mod repair;
pub mod task;

pub use accumulator::ToolCallAccumulator;
pub use chat::{ChatEvent, ChatService, ChatSummary, ToolMarker, ToolMarkerKind};
pub use config::{ChatConfig, Config, TaskConfig};
pub use error::{ConfigError, CoreError, CoreResult, TaskError};
pub use repair::repair_arguments;
pub use task::{Task, TaskManager, TaskResult, TaskStatus, PROGRESS_TOTAL};
