//! Chat provider abstraction for mcpbridge.
//!
//! This crate gives the chat bridge one interface over two wire dialects:
//! - OpenAI chat completions (and compatible endpoints)
//! - Anthropic messages
//!
//! Each provider turns its raw stream into [`ChatFragment`]s so the chat loop
//! never sees a dialect-specific chunk.

pub mod error;
pub mod family;
pub mod message;
pub mod registry;
pub mod sse;
pub mod stream;

pub mod anthropic;
pub mod openai;

pub use error::{ProviderError, ProviderResult};
pub use family::ProviderFamily;
pub use message::{ContentPart, Message, Role, ToolCall};
pub use registry::{ProviderConfig, ProviderRegistry};
pub use stream::{ArgumentsFragment, ChatFragment, FinishReason, ToolCallFragment, Usage};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;

/// Options for a single model request.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Temperature for sampling (0.0-1.0).
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// System prompt.
    pub system: Option<String>,
    /// Available tools.
    pub tools: Vec<ToolDefinition>,
}

/// A tool definition for the model.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON Schema for the tool parameters.
    pub parameters: Value,
}

/// A complete, non-streamed model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    /// Assistant text.
    pub text: String,
    /// Tool calls with parsed arguments.
    pub tool_calls: Vec<ToolCall>,
    /// Why the model stopped.
    pub finish_reason: Option<FinishReason>,
    /// Token usage for the request.
    pub usage: Usage,
}

impl ChatResponse {
    /// Replay the response as fragments, as if it had been streamed.
    pub fn into_fragments(self) -> Vec<ChatFragment> {
        let mut fragments = Vec::with_capacity(3);
        if !self.text.is_empty() {
            fragments.push(ChatFragment::text(self.text));
        }
        if !self.tool_calls.is_empty() {
            let calls = self
                .tool_calls
                .into_iter()
                .map(|call| ToolCallFragment {
                    id: call.id,
                    name: Some(call.name),
                    arguments: (!call.arguments.is_empty())
                        .then_some(ArgumentsFragment::Object(call.arguments)),
                })
                .collect();
            fragments.push(ChatFragment::tool_calls(calls));
        }
        fragments.push(ChatFragment {
            finish_reason: self.finish_reason,
            usage: Some(self.usage),
            ..Default::default()
        });
        fragments
    }
}

/// Stream of normalized fragments.
pub type FragmentStream = BoxStream<'static, ProviderResult<ChatFragment>>;

/// The main trait for chat-completion providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Registry id (e.g. "openai", "local-llama").
    fn provider_id(&self) -> &str;

    /// Wire dialect of this provider.
    fn family(&self) -> ProviderFamily;

    /// Model requested from the backend.
    fn model(&self) -> &str;

    /// Whether [`ChatProvider::stream`] is available.
    fn supports_streaming(&self) -> bool {
        true
    }

    /// Generate a streaming response.
    ///
    /// Providers without a streaming endpoint keep the default, which fails
    /// with [`ProviderError::StreamingUnsupported`].
    async fn stream(
        &self,
        _messages: Vec<Message>,
        _options: GenerateOptions,
    ) -> ProviderResult<FragmentStream> {
        Err(ProviderError::StreamingUnsupported(
            self.provider_id().to_string(),
        ))
    }

    /// Generate a complete response in one request.
    async fn complete(
        &self,
        messages: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<ChatResponse>;
}

/// A shared provider for dynamic dispatch.
pub type BoxedChatProvider = Arc<dyn ChatProvider>;
