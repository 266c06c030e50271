//! Streaming response types.
//!
//! Every provider family speaks its own wire dialect; its adapter turns each
//! raw chunk into a [`ChatFragment`], the one shape the chat loop consumes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One normalized piece of a streamed model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatFragment {
    /// Assistant text.
    pub content: Option<String>,
    /// Partial tool call data.
    pub tool_calls: Vec<ToolCallFragment>,
    /// Set on the fragment that ends the provider's turn.
    pub finish_reason: Option<FinishReason>,
    /// Token usage reported by the provider.
    pub usage: Option<Usage>,
}

impl ChatFragment {
    /// A text-only fragment.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A fragment carrying partial tool call data.
    pub fn tool_calls(calls: Vec<ToolCallFragment>) -> Self {
        Self {
            tool_calls: calls,
            ..Default::default()
        }
    }

    /// A fragment ending the turn.
    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Default::default()
        }
    }

    /// A usage-only fragment.
    pub fn usage(usage: Usage) -> Self {
        Self {
            usage: Some(usage),
            ..Default::default()
        }
    }

    /// Whether the fragment carries nothing at all.
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.tool_calls.is_empty()
            && self.finish_reason.is_none()
            && self.usage.is_none()
    }
}

/// Partial tool call data keyed by call id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallFragment {
    /// Provider-assigned call id.
    pub id: String,
    /// Tool name; may be absent in fragments after the first.
    pub name: Option<String>,
    /// Argument data carried by this fragment.
    pub arguments: Option<ArgumentsFragment>,
}

impl ToolCallFragment {
    /// Fragment that only names the call.
    pub fn start(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            arguments: None,
        }
    }

    /// Fragment with raw JSON argument text.
    pub fn text_arguments(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            arguments: Some(ArgumentsFragment::Text(text.into())),
        }
    }

    /// Fragment with structured arguments.
    pub fn object_arguments(id: impl Into<String>, object: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: None,
            arguments: Some(ArgumentsFragment::Object(object)),
        }
    }
}

/// How a provider delivers tool arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentsFragment {
    /// A slice of raw JSON text; concatenated and parsed by the receiver.
    Text(String),
    /// A structured partial object; shallow-merged by the receiver.
    Object(Map<String, Value>),
}

/// Parse raw argument text into a JSON object.
///
/// Blank text counts as an empty object. Returns `None` when the text is not
/// valid JSON or is JSON but not an object.
pub fn parse_object_arguments(raw: &str) -> Option<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Some(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens used.
    pub input_tokens: u32,
    /// Output tokens generated.
    pub output_tokens: u32,
}

impl Usage {
    /// Create a new usage with input and output tokens.
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens (input + output).
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Merge with another usage (adding all counts).
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Reason for finishing a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Normal completion (end of turn).
    #[default]
    EndTurn,
    /// Stopped due to stop sequence.
    Stop,
    /// Stopped due to max tokens.
    MaxTokens,
    /// Stopped for tool use.
    ToolUse,
    /// Content was filtered.
    ContentFilter,
    /// Unknown or other reason.
    Other,
}

impl FinishReason {
    /// Parse from Anthropic's stop_reason.
    pub fn from_anthropic(reason: &str) -> Self {
        match reason {
            "end_turn" => Self::EndTurn,
            "stop_sequence" => Self::Stop,
            "max_tokens" => Self::MaxTokens,
            "tool_use" => Self::ToolUse,
            _ => Self::Other,
        }
    }

    /// Parse from OpenAI's finish_reason.
    pub fn from_openai(reason: &str) -> Self {
        match reason {
            "stop" => Self::EndTurn,
            "length" => Self::MaxTokens,
            "tool_calls" | "function_call" => Self::ToolUse,
            "content_filter" => Self::ContentFilter,
            _ => Self::Other,
        }
    }
}
