//! OpenAI chat completions provider.
//!
//! Also serves any OpenAI-compatible endpoint through a custom base URL.

use crate::{
    error::ProviderError,
    family::ProviderFamily,
    message::{ContentPart, Message, Role, ToolCall},
    sse,
    stream::{
        parse_object_arguments, ArgumentsFragment, ChatFragment, FinishReason, ToolCallFragment,
        Usage,
    },
    ChatProvider, ChatResponse, FragmentStream, GenerateOptions, ProviderResult, ToolDefinition,
};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use mcpbridge_util::Identifier;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, trace, warn};

/// The OpenAI API base URL.
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// OpenAI-family provider.
pub struct OpenAiProvider {
    id: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    streaming: bool,
}

impl OpenAiProvider {
    /// Create a provider against the public OpenAI API.
    pub fn new(id: &str, api_key: &str, model: &str) -> ProviderResult<Self> {
        Self::with_base_url(id, api_key, OPENAI_API_URL, model)
    }

    /// Create a provider against a custom OpenAI-compatible endpoint.
    pub fn with_base_url(
        id: &str,
        api_key: &str,
        base_url: &str,
        model: &str,
    ) -> ProviderResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|_| ProviderError::invalid_api_key(id))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        debug!(provider = %id, model = %model, "Creating OpenAI provider");

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::internal(e.to_string()))?;

        Ok(Self {
            id: id.to_string(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            streaming: true,
        })
    }

    /// Enable or disable the streaming endpoint.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Convert our messages to OpenAI format.
    fn convert_messages(messages: &[Message], system: Option<&str>) -> Vec<Value> {
        let mut result = Vec::new();

        if let Some(sys) = system {
            result.push(json!({
                "role": "system",
                "content": sys
            }));
        }

        for msg in messages {
            // Tool results become one `tool` message per call, whatever role carried them.
            for part in &msg.content {
                if let ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } = part
                {
                    result.push(json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content
                    }));
                }
            }

            let text = msg.text();
            match msg.role {
                Role::Tool => {}
                Role::Assistant => {
                    let tool_calls = convert_tool_calls(&msg.content);
                    if text.is_empty() && tool_calls.is_none() {
                        continue;
                    }
                    let mut message = json!({
                        "role": "assistant",
                        "content": if text.is_empty() { Value::Null } else { Value::String(text) }
                    });
                    if let Some(tool_calls) = tool_calls {
                        message["tool_calls"] = tool_calls;
                    }
                    result.push(message);
                }
                Role::User | Role::System => {
                    if text.is_empty() {
                        continue;
                    }
                    let role = if msg.role == Role::User { "user" } else { "system" };
                    result.push(json!({
                        "role": role,
                        "content": text
                    }));
                }
            }
        }

        result
    }

    /// Convert tools to OpenAI format.
    fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters
                    }
                })
            })
            .collect()
    }

    fn build_request(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        stream: bool,
    ) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(messages, options.system.as_deref()),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            tools: Self::convert_tools(&options.tools),
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    async fn send(&self, request: &ChatRequest) -> ProviderResult<reqwest::Response> {
        debug!(
            provider = %self.id,
            model = %self.model,
            message_count = request.messages.len(),
            tool_count = request.tools.len(),
            stream = request.stream,
            "Sending OpenAI request"
        );
        trace!(request = ?request, "Full request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(provider = %self.id, status = %status, error = %error_text, "OpenAI API error");
            return Err(ProviderError::from_status(status, error_text));
        }

        Ok(response)
    }
}

/// Convert assistant tool calls to OpenAI format.
fn convert_tool_calls(parts: &[ContentPart]) -> Option<Value> {
    let calls: Vec<Value> = parts
        .iter()
        .filter_map(|part| {
            if let ContentPart::ToolUse { id, name, input } = part {
                Some(json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": input.to_string()
                    }
                }))
            } else {
                None
            }
        })
        .collect();

    if calls.is_empty() {
        None
    } else {
        Some(Value::Array(calls))
    }
}

/// Turns raw OpenAI stream chunks into [`ChatFragment`]s.
///
/// OpenAI identifies a call by its position in the choice after the first
/// delta, so the adapter remembers which id belongs to which index. Calls the
/// server never names get a generated id.
#[derive(Debug, Default)]
pub struct OpenAiStreamAdapter {
    call_ids: Vec<String>,
}

impl OpenAiStreamAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one SSE `data:` payload.
    ///
    /// Returns `None` for the `[DONE]` sentinel and for payloads that do not
    /// parse as a chunk.
    pub fn normalize(&mut self, data: &str) -> Option<ChatFragment> {
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return None;
        }

        let chunk: ChatChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                trace!(error = %e, data = %data, "Failed to parse chunk");
                return None;
            }
        };

        let mut fragment = ChatFragment::default();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                fragment
                    .content
                    .get_or_insert_with(String::new)
                    .push_str(&content);
            }

            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let id = self.call_id(delta.index, delta.id);
                let (name, arguments) = delta
                    .function
                    .map(|f| (f.name, f.arguments))
                    .unwrap_or_default();
                fragment.tool_calls.push(ToolCallFragment {
                    id,
                    name: name.filter(|n| !n.is_empty()),
                    arguments: arguments
                        .filter(|a| !a.is_empty())
                        .map(ArgumentsFragment::Text),
                });
            }

            if let Some(reason) = choice.finish_reason {
                fragment.finish_reason = Some(FinishReason::from_openai(&reason));
            }
        }

        if let Some(usage) = chunk.usage {
            fragment.usage = Some(Usage::new(usage.prompt_tokens, usage.completion_tokens));
        }

        Some(fragment)
    }

    fn call_id(&mut self, index: usize, id: Option<String>) -> String {
        while self.call_ids.len() <= index {
            self.call_ids.push(String::new());
        }
        let slot = &mut self.call_ids[index];
        if slot.is_empty() {
            *slot = id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(Identifier::tool_call);
        }
        slot.clone()
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn stream(
        &self,
        messages: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<FragmentStream> {
        if !self.streaming {
            return Err(ProviderError::StreamingUnsupported(self.id.clone()));
        }

        let request = self.build_request(&messages, &options, true);
        let response = self.send(&request).await?;
        let mut events = sse::events(response);

        Ok(Box::pin(try_stream! {
            let mut adapter = OpenAiStreamAdapter::new();

            while let Some(event) = events.next().await {
                let event = event?;
                if event.data.trim() == "[DONE]" {
                    break;
                }
                if let Some(fragment) = adapter.normalize(&event.data) {
                    if !fragment.is_empty() {
                        yield fragment;
                    }
                }
            }
        }))
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<ChatResponse> {
        let request = self.build_request(&messages, &options, false);
        let response = self.send(&request).await?;
        let body: CompletionResponse = response.json().await?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::invalid_response("completion has no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let arguments = parse_object_arguments(&call.function.arguments)
                    .unwrap_or_else(|| {
                        warn!(
                            tool = %call.function.name,
                            raw = %call.function.arguments,
                            "Tool arguments are not a JSON object, using empty arguments"
                        );
                        Map::new()
                    });
                ToolCall::new(call.id, call.function.name, arguments)
            })
            .collect();

        Ok(ChatResponse {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(FinishReason::from_openai),
            usage: body
                .usage
                .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
                .unwrap_or_default(),
        })
    }
}

/// OpenAI chat completion request.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

/// OpenAI streaming chunk.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Non-streaming completion response.
#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<CompletionToolCall>>,
}

#[derive(Debug, Deserialize)]
struct CompletionToolCall {
    id: String,
    function: CompletionFunction,
}

#[derive(Debug, Deserialize)]
struct CompletionFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}
