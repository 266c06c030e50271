//! Provider families.
//!
//! Providers that share a wire dialect form a family. The family decides the
//! few behaviours where dialects disagree: when a turn counts as a tool-use
//! request, and what a tool result message looks like.

use crate::message::{ContentPart, Message, Role};
use crate::stream::FinishReason;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire dialect spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    /// OpenAI chat completions and compatible APIs.
    ///
    /// Tool arguments stream as raw JSON text and a tool-use turn is signalled
    /// by finish reason `tool_calls`.
    #[serde(alias = "openai-compatible")]
    OpenAi,
    /// Anthropic messages API.
    ///
    /// Tool arguments arrive as structured objects and any accumulated tool
    /// call is itself the tool-use signal.
    Anthropic,
}

impl ProviderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::OpenAi => "openai",
            ProviderFamily::Anthropic => "anthropic",
        }
    }

    /// Whether a finished turn asks for tool execution.
    pub fn wants_tool_execution(&self, finish_reason: Option<FinishReason>, has_calls: bool) -> bool {
        if !has_calls {
            return false;
        }
        match self {
            ProviderFamily::OpenAi => finish_reason == Some(FinishReason::ToolUse),
            ProviderFamily::Anthropic => true,
        }
    }

    /// Build the history entry carrying a tool result back to the model.
    pub fn tool_result_message(
        &self,
        call_id: &str,
        content: impl Into<String>,
        is_error: bool,
    ) -> Message {
        let role = match self {
            ProviderFamily::OpenAi => Role::Tool,
            ProviderFamily::Anthropic => Role::User,
        };
        Message {
            role,
            content: vec![ContentPart::tool_result(call_id, content, is_error)],
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
