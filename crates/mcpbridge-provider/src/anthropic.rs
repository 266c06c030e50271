//! Anthropic messages provider.

use crate::{
    error::ProviderError,
    family::ProviderFamily,
    message::{ContentPart, Message, Role, ToolCall},
    sse::{self, SseEvent},
    stream::{
        parse_object_arguments, ArgumentsFragment, ChatFragment, FinishReason, ToolCallFragment, Usage,
    },
    ChatProvider, ChatResponse, FragmentStream, GenerateOptions, ProviderResult, ToolDefinition,
};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// The Anthropic API base URL.
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";

/// The Anthropic API version.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Used when the caller sets no limit; the messages API requires one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic provider.
pub struct AnthropicProvider {
    id: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    streaming: bool,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with API key.
    pub fn new(id: &str, api_key: &str, model: &str) -> ProviderResult<Self> {
        Self::with_base_url(id, api_key, ANTHROPIC_API_URL, model)
    }

    /// Create a new Anthropic provider with a custom base URL.
    pub fn with_base_url(
        id: &str,
        api_key: &str,
        base_url: &str,
        model: &str,
    ) -> ProviderResult<Self> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key).map_err(|_| ProviderError::invalid_api_key(id))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        debug!(provider = %id, model = %model, "Creating Anthropic provider");

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

    /// Convert messages to Anthropic format.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system: Option<String> = None;
        let mut converted = Vec::new();

        for msg in messages {
            let role = match msg.role {
                Role::System => {
                    let text = msg.text();
                    system = Some(match system {
                        None => text,
                        Some(existing) => format!("{existing}\n\n{text}"),
                    });
                    continue;
                }
                Role::Assistant => "assistant",
                // Tool results go to user messages in Anthropic format
                Role::User | Role::Tool => "user",
            };
            converted.push(AnthropicMessage {
                role: role.to_string(),
                content: Self::convert_content(&msg.content),
            });
        }

        (system, converted)
    }

    /// Convert content parts to Anthropic format.
    fn convert_content(content: &[ContentPart]) -> Vec<Value> {
        content
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                ContentPart::ToolUse { id, name, input } => json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input
                }),
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                    "is_error": is_error.unwrap_or(false)
                }),
            })
            .collect()
    }

    /// Convert tool definitions to Anthropic format.
    fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.parameters
                })
            })
            .collect()
    }

    fn build_request(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        stream: bool,
    ) -> AnthropicRequest {
        let (mut system, converted) = Self::convert_messages(messages);
        if let Some(extra) = options.system.as_deref() {
            system = Some(match system {
                None => extra.to_string(),
                Some(existing) => format!("{extra}\n\n{existing}"),
            });
        }

        AnthropicRequest {
            model: self.model.clone(),
            messages: converted,
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            temperature: options.temperature,
            tools: if options.tools.is_empty() {
                None
            } else {
                Some(Self::convert_tools(&options.tools))
            },
            stream,
        }
    }

    async fn send(&self, request: &AnthropicRequest) -> ProviderResult<reqwest::Response> {
        debug!(
            provider = %self.id,
            model = %self.model,
            message_count = request.messages.len(),
            tool_count = request.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            stream = request.stream,
            "Sending Anthropic request"
        );

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(provider = %self.id, status = %status, body = %body, "Anthropic request failed");
            return Err(ProviderError::from_status(status, body));
        }

        Ok(response)
    }
}

/// Tool-use block whose input is still streaming.
#[derive(Debug)]
struct PendingToolUse {
    id: String,
    name: String,
    json: String,
}

/// Turns Anthropic SSE events into [`ChatFragment`]s.
///
/// Tool input arrives as `input_json_delta` slices. The adapter buffers them
/// per content block and emits one structured arguments fragment when the
/// block stops.
#[derive(Debug, Default)]
pub struct AnthropicStreamAdapter {
    pending: HashMap<usize, PendingToolUse>,
    input_tokens: u32,
}

impl AnthropicStreamAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one SSE event.
    pub fn normalize(&mut self, event: &SseEvent) -> ProviderResult<Option<ChatFragment>> {
        match event.event.as_str() {
            "message_start" => {
                let data: MessageStart = serde_json::from_str(&event.data)?;
                self.input_tokens = data.message.usage.input_tokens.unwrap_or(0);
                Ok(None)
            }
            "content_block_start" => {
                let data: ContentBlockStart = serde_json::from_str(&event.data)?;
                let block = data.content_block;
                match block.r#type.as_str() {
                    "text" => Ok(block
                        .text
                        .filter(|t| !t.is_empty())
                        .map(ChatFragment::text)),
                    "tool_use" => {
                        let id = block.id.unwrap_or_default();
                        let name = block.name.unwrap_or_default();
                        let mut call = ToolCallFragment::start(id.clone(), name.clone());
                        if let Some(Value::Object(input)) = block.input {
                            if !input.is_empty() {
                                call.arguments = Some(ArgumentsFragment::Object(input));
                            }
                        }
                        self.pending.insert(
                            data.index,
                            PendingToolUse {
                                id,
                                name,
                                json: String::new(),
                            },
                        );
                        Ok(Some(ChatFragment::tool_calls(vec![call])))
                    }
                    _ => Ok(None),
                }
            }
            "content_block_delta" => {
                let data: ContentBlockDelta = serde_json::from_str(&event.data)?;
                match data.delta.r#type.as_str() {
                    "text_delta" => Ok(data
                        .delta
                        .text
                        .filter(|t| !t.is_empty())
                        .map(ChatFragment::text)),
                    "input_json_delta" => {
                        if let Some(pending) = self.pending.get_mut(&data.index) {
                            pending
                                .json
                                .push_str(data.delta.partial_json.as_deref().unwrap_or_default());
                        }
                        Ok(None)
                    }
                    _ => Ok(None),
                }
            }
            "content_block_stop" => {
                let data: ContentBlockStop = serde_json::from_str(&event.data)?;
                let Some(pending) = self.pending.remove(&data.index) else {
                    return Ok(None);
                };
                match parse_object_arguments(&pending.json) {
                    Some(input) if input.is_empty() => Ok(None),
                    Some(input) => Ok(Some(ChatFragment::tool_calls(vec![
                        ToolCallFragment::object_arguments(pending.id, input),
                    ]))),
                    None => {
                        warn!(
                            tool = %pending.name,
                            id = %pending.id,
                            raw = %pending.json,
                            "Discarding malformed tool input"
                        );
                        Ok(None)
                    }
                }
            }
            "message_delta" => {
                let data: MessageDelta = serde_json::from_str(&event.data)?;
                let usage = Usage::new(
                    data.usage
                        .input_tokens
                        .unwrap_or(self.input_tokens),
                    data.usage.output_tokens.unwrap_or(0),
                );
                let mut fragment = ChatFragment::usage(usage);
                fragment.finish_reason = data
                    .delta
                    .stop_reason
                    .as_deref()
                    .map(FinishReason::from_anthropic);
                Ok(Some(fragment))
            }
            "message_stop" | "ping" => Ok(None),
            "error" => {
                let data: ErrorEvent = serde_json::from_str(&event.data)?;
                Err(ProviderError::internal(data.error.message))
            }
            _ => {
                debug!(event = %event.event, "Unknown SSE event");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::Anthropic
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
            let mut adapter = AnthropicStreamAdapter::new();

            while let Some(event) = events.next().await {
                let event = event?;
                if let Some(fragment) = adapter.normalize(&event)? {
                    yield fragment;
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
        let body: MessageResponse = response.json().await?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in body.content {
            match block.r#type.as_str() {
                "text" => text.push_str(block.text.as_deref().unwrap_or_default()),
                "tool_use" => {
                    let arguments = match block.input {
                        Some(Value::Object(input)) => input,
                        _ => Map::new(),
                    };
                    tool_calls.push(ToolCall::new(
                        block.id.unwrap_or_default(),
                        block.name.unwrap_or_default(),
                        arguments,
                    ));
                }
                _ => {}
            }
        }

        Ok(ChatResponse {
            text,
            tool_calls,
            finish_reason: body.stop_reason.as_deref().map(FinishReason::from_anthropic),
            usage: Usage::new(
                body.usage.input_tokens.unwrap_or(0),
                body.usage.output_tokens.unwrap_or(0),
            ),
        })
    }
}

// Request/response types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    message: MessageStartBody,
}

#[derive(Debug, Deserialize)]
struct MessageStartBody {
    #[serde(default)]
    usage: MessageUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStart {
    #[serde(default)]
    index: usize,
    content_block: ContentBlock,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    r#type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    #[serde(default)]
    index: usize,
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    r#type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    partial_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStop {
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    delta: MessageDeltaContent,
    #[serde(default)]
    usage: MessageUsage,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaContent {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: MessageUsage,
}

#[derive(Debug, Deserialize)]
struct ErrorEvent {
    error: ErrorContent,
}

#[derive(Debug, Deserialize)]
struct ErrorContent {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, data: &str) -> SseEvent {
        SseEvent {
            event: name.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_convert_messages() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            Message::assistant("Hi there!"),
            ProviderFamily::Anthropic.tool_result_message("toolu_1", "done", false),
        ];

        let (system, converted) = AnthropicProvider::convert_messages(&messages);

        assert_eq!(system, Some("You are helpful".to_string()));
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[0].role, "user");
        assert_eq!(converted[1].role, "assistant");
        assert_eq!(converted[2].role, "user");
        assert_eq!(converted[2].content[0]["type"], "tool_result");
        assert_eq!(converted[2].content[0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_text_deltas() {
        let mut adapter = AnthropicStreamAdapter::new();
        let fragment = adapter
            .normalize(&event(
                "content_block_delta",
                r#"{"index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
            ))
            .unwrap()
            .unwrap();
        assert_eq!(fragment.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_tool_use_buffers_input_until_block_stop() {
        let mut adapter = AnthropicStreamAdapter::new();

        let start = adapter
            .normalize(&event(
                "content_block_start",
                r#"{"index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"calculate","input":{}}}"#,
            ))
            .unwrap()
            .unwrap();
        assert_eq!(start.tool_calls[0], ToolCallFragment::start("toolu_1", "calculate"));

        for part in [r#"{\"expression\":"#, r#" \"2+2\"}"#] {
            let data = format!(
                r#"{{"index":1,"delta":{{"type":"input_json_delta","partial_json":"{part}"}}}}"#
            );
            assert!(adapter
                .normalize(&event("content_block_delta", &data))
                .unwrap()
                .is_none());
        }

        let stop = adapter
            .normalize(&event("content_block_stop", r#"{"index":1}"#))
            .unwrap()
            .unwrap();
        match &stop.tool_calls[0].arguments {
            Some(ArgumentsFragment::Object(object)) => assert_eq!(object["expression"], "2+2"),
            other => panic!("Expected object arguments, got {other:?}"),
        }
        assert_eq!(stop.tool_calls[0].id, "toolu_1");
    }

    #[test]
    fn test_malformed_tool_input_is_dropped() {
        let mut adapter = AnthropicStreamAdapter::new();
        adapter
            .normalize(&event(
                "content_block_start",
                r#"{"index":0,"content_block":{"type":"tool_use","id":"toolu_2","name":"echo"}}"#,
            ))
            .unwrap();
        adapter
            .normalize(&event(
                "content_block_delta",
                r#"{"index":0,"delta":{"type":"input_json_delta","partial_json":"{\"message\":"}}"#,
            ))
            .unwrap();

        let stop = adapter
            .normalize(&event("content_block_stop", r#"{"index":0}"#))
            .unwrap();
        assert!(stop.is_none());
    }

    #[test]
    fn test_message_delta_carries_usage_and_stop_reason() {
        let mut adapter = AnthropicStreamAdapter::new();
        adapter
            .normalize(&event(
                "message_start",
                r#"{"message":{"usage":{"input_tokens":25,"output_tokens":1}}}"#,
            ))
            .unwrap();

        let fragment = adapter
            .normalize(&event(
                "message_delta",
                r#"{"delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":15}}"#,
            ))
            .unwrap()
            .unwrap();

        assert_eq!(fragment.finish_reason, Some(FinishReason::ToolUse));
        assert_eq!(fragment.usage, Some(Usage::new(25, 15)));
    }

    #[test]
    fn test_error_event() {
        let mut adapter = AnthropicStreamAdapter::new();
        let result = adapter.normalize(&event(
            "error",
            r#"{"error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ));
        assert!(matches!(result, Err(ProviderError::Internal { .. })));
    }
}
