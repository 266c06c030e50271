//! Test provider implementations.
//!
//! Provides a provider that records every request and replays queued
//! fragment scripts, one script per round.

use async_trait::async_trait;
use futures::StreamExt;
use mcpbridge_provider::stream::parse_object_arguments;
use mcpbridge_provider::{
    ArgumentsFragment, ChatFragment, ChatProvider, ChatResponse, FinishReason, FragmentStream,
    GenerateOptions, Message, ProviderError, ProviderFamily, ProviderResult, ToolCall,
    ToolCallFragment, Usage,
};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// A provider that records all requests for later inspection.
///
/// # Example
///
/// ```rust
/// use mcpbridge_test_utils::providers::RecordingProvider;
///
/// let provider = RecordingProvider::new("scripted")
///     .with_response("Hello! How can I help?");
/// assert_eq!(provider.call_count(), 0);
/// ```
#[derive(Clone)]
pub struct RecordingProvider {
    id: String,
    family: ProviderFamily,
    streaming: bool,
    /// Recorded requests.
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    /// Queue of responses, one per request.
    responses: Arc<Mutex<Vec<ProviderResponse>>>,
}

/// A recorded request to the provider.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// The messages sent to the provider.
    pub messages: Vec<Message>,
    /// The options used for generation.
    pub options: GenerateOptions,
    /// Whether the request used the streaming endpoint.
    pub streamed: bool,
}

/// A response that the provider can return.
#[derive(Debug, Clone)]
pub enum ProviderResponse {
    /// Plain text ending the turn.
    Text(String),
    /// One complete tool call ending in a tool-use finish.
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    /// An explicit fragment script.
    Fragments(Vec<ChatFragment>),
    /// A fragment script after which the stream breaks.
    Interrupted(Vec<ChatFragment>),
    /// Fail the request.
    Error(String),
}

impl ProviderResponse {
    /// Items the stream yields; an `Err` here fails the request itself.
    fn into_script(self) -> ProviderResult<Vec<ProviderResult<ChatFragment>>> {
        match self {
            ProviderResponse::Interrupted(fragments) => Ok(fragments
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(ProviderError::StreamInterrupted)))
                .collect()),
            other => Ok(other.into_fragments()?.into_iter().map(Ok).collect()),
        }
    }

    fn into_fragments(self) -> ProviderResult<Vec<ChatFragment>> {
        match self {
            ProviderResponse::Text(text) => Ok(vec![
                ChatFragment::text(text),
                ChatFragment::finish(FinishReason::EndTurn),
                ChatFragment::usage(Usage::new(100, 50)),
            ]),
            ProviderResponse::ToolCall {
                id,
                name,
                arguments,
            } => {
                let mut call = ToolCallFragment::start(id, name);
                if let Value::Object(object) = arguments {
                    call.arguments = Some(ArgumentsFragment::Object(object));
                }
                Ok(vec![
                    ChatFragment::tool_calls(vec![call]),
                    ChatFragment::finish(FinishReason::ToolUse),
                    ChatFragment::usage(Usage::new(100, 50)),
                ])
            }
            ProviderResponse::Fragments(fragments) | ProviderResponse::Interrupted(fragments) => {
                Ok(fragments)
            }
            ProviderResponse::Error(message) => Err(ProviderError::internal(message)),
        }
    }
}

impl RecordingProvider {
    /// Create a streaming OpenAI-family provider registered under `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            family: ProviderFamily::OpenAi,
            streaming: true,
            calls: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Use a different provider family.
    pub fn with_family(mut self, family: ProviderFamily) -> Self {
        self.family = family;
        self
    }

    /// Disable the streaming endpoint.
    pub fn without_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    /// Queue a text response.
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.push(ProviderResponse::Text(text.into()))
    }

    /// Queue a tool call response.
    pub fn with_tool_call(self, id: &str, name: &str, arguments: Value) -> Self {
        self.push(ProviderResponse::ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        })
    }

    /// Queue an explicit fragment script.
    pub fn with_fragments(self, fragments: Vec<ChatFragment>) -> Self {
        self.push(ProviderResponse::Fragments(fragments))
    }

    /// Queue a fragment script whose stream breaks after the last fragment.
    pub fn with_interrupted_stream(self, fragments: Vec<ChatFragment>) -> Self {
        self.push(ProviderResponse::Interrupted(fragments))
    }

    /// Queue an error response.
    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.push(ProviderResponse::Error(message.into()))
    }

    fn push(self, response: ProviderResponse) -> Self {
        self.responses.lock().unwrap().push(response);
        self
    }

    /// Get all recorded calls.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Get the last call made.
    pub fn last_call(&self) -> Option<RecordedCall> {
        self.calls.lock().unwrap().last().cloned()
    }

    /// Responses still queued.
    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }

    fn next_response(
        &self,
        messages: Vec<Message>,
        options: GenerateOptions,
        streamed: bool,
    ) -> ProviderResult<Vec<ProviderResult<ChatFragment>>> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages,
            options,
            streamed,
        });
        let response = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                ProviderResponse::Text("Test response".to_string())
            } else {
                responses.remove(0)
            }
        };
        response.into_script()
    }
}

#[async_trait]
impl ChatProvider for RecordingProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> ProviderFamily {
        self.family
    }

    fn model(&self) -> &str {
        "test-model"
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
        let script = self.next_response(messages, options, true)?;
        Ok(futures::stream::iter(script).boxed())
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<ChatResponse> {
        let fragments = self
            .next_response(messages, options, false)?
            .into_iter()
            .collect::<ProviderResult<Vec<_>>>()?;
        Ok(fold_fragments(fragments))
    }
}

/// Collapse a fragment script into a complete response.
fn fold_fragments(fragments: Vec<ChatFragment>) -> ChatResponse {
    let mut response = ChatResponse::default();
    let mut calls: Vec<(String, String, Map<String, Value>, String)> = Vec::new();

    for fragment in fragments {
        if let Some(content) = fragment.content {
            response.text.push_str(&content);
        }
        for call in fragment.tool_calls {
            let index = match calls.iter().position(|c| c.0 == call.id) {
                Some(index) => index,
                None => {
                    calls.push((call.id.clone(), String::new(), Map::new(), String::new()));
                    calls.len() - 1
                }
            };
            let entry = &mut calls[index];
            if let Some(name) = call.name {
                entry.1 = name;
            }
            match call.arguments {
                Some(ArgumentsFragment::Object(object)) => entry.2.extend(object),
                Some(ArgumentsFragment::Text(text)) => entry.3.push_str(&text),
                None => {}
            }
        }
        if fragment.finish_reason.is_some() {
            response.finish_reason = fragment.finish_reason;
        }
        if let Some(usage) = fragment.usage {
            response.usage.merge(&usage);
        }
    }

    response.tool_calls = calls
        .into_iter()
        .map(|(id, name, mut arguments, raw)| {
            if let Some(parsed) = parse_object_arguments(&raw) {
                arguments.extend(parsed);
            }
            ToolCall::new(id, name, arguments)
        })
        .collect();
    response
}
