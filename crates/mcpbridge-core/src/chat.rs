//! Chat loop - drives a model through tool calls until it answers.
//!
//! One turn of the loop:
//! - Send the history and tool list to the provider
//! - Forward text as it streams and fold tool call fragments together
//! - Execute requested tools in order and append their results
//! - Repeat until the model stops asking for tools
//!
//! The turn is capped by a round count and a wall-clock deadline.

use crate::accumulator::ToolCallAccumulator;
use crate::config::ChatConfig;
use crate::error::{CoreError, CoreResult};
use crate::repair::repair_arguments;
use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use mcpbridge_mcp::{McpTool, ToolExecutor};
use mcpbridge_provider::{
    BoxedChatProvider, FinishReason, FragmentStream, GenerateOptions, Message, ProviderError,
    ProviderRegistry, ToolCall, ToolDefinition, Usage,
};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Something the caller sees while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Assistant text, in arrival order.
    Text(String),
    /// The provider finished a round.
    Finish(FinishReason),
    /// A tool is about to run or has run.
    ToolMarker(ToolMarker),
    /// The turn is complete.
    Done(ChatSummary),
}

impl ChatEvent {
    /// Text to show a user for this event, if any.
    pub fn display_text(&self) -> Option<String> {
        match self {
            ChatEvent::Text(text) => Some(text.clone()),
            ChatEvent::ToolMarker(marker) => Some(marker.to_string()),
            ChatEvent::Finish(_) | ChatEvent::Done(_) => None,
        }
    }
}

/// Progress of one tool execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolMarkerKind {
    Started,
    Completed,
    Failed(String),
}

/// Human-readable marker around a tool execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolMarker {
    pub call_id: String,
    pub tool: String,
    pub kind: ToolMarkerKind,
}

impl fmt::Display for ToolMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ToolMarkerKind::Started => write!(f, "\n[Running tool: {}]\n", self.tool),
            ToolMarkerKind::Completed => write!(f, "[Tool {} completed]\n", self.tool),
            ToolMarkerKind::Failed(error) => {
                write!(f, "[Tool {} failed: {}]\n", self.tool, error)
            }
        }
    }
}

/// Outcome of a finished turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSummary {
    /// Assistant text of the final round.
    pub text: String,
    /// Why the final round stopped.
    pub finish_reason: Option<FinishReason>,
    /// Provider requests made.
    pub rounds: usize,
    /// Token usage summed over all rounds.
    pub usage: Usage,
    /// Conversation history, starting with the user message.
    pub history: Vec<Message>,
}

/// Runs chat turns against registered providers with a shared tool set.
#[derive(Clone)]
pub struct ChatService {
    providers: ProviderRegistry,
    tools: Arc<dyn ToolExecutor>,
    config: ChatConfig,
}

impl fmt::Debug for ChatService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatService")
            .field("providers", &self.providers.list())
            .field("config", &self.config)
            .finish()
    }
}

impl ChatService {
    pub fn new(providers: ProviderRegistry, tools: Arc<dyn ToolExecutor>, config: ChatConfig) -> Self {
        Self {
            providers,
            tools,
            config,
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Run a turn, streaming events as they happen.
    ///
    /// Providers without a streaming endpoint are driven through
    /// [`ChatProvider::complete`](mcpbridge_provider::ChatProvider::complete)
    /// and replayed as fragments, so the caller sees the same events.
    /// The stream ends with [`ChatEvent::Done`] or an error.
    pub fn chat_stream(
        &self,
        message: &str,
        provider_id: Option<&str>,
    ) -> BoxStream<'static, CoreResult<ChatEvent>> {
        self.run(message, provider_id, true)
    }

    /// Run a turn without streaming and return its summary.
    pub async fn chat(&self, message: &str, provider_id: Option<&str>) -> CoreResult<ChatSummary> {
        let mut events = self.run(message, provider_id, false);
        while let Some(event) = events.next().await {
            if let ChatEvent::Done(summary) = event? {
                return Ok(summary);
            }
        }
        Err(ProviderError::StreamInterrupted.into())
    }

    fn run(
        &self,
        message: &str,
        provider_id: Option<&str>,
        streaming: bool,
    ) -> BoxStream<'static, CoreResult<ChatEvent>> {
        let resolved = self
            .providers
            .resolve(provider_id.or(self.config.default_provider.as_deref()));
        let tools = self.tools.clone();
        let config = self.config.clone();
        let user_message = message.to_string();

        let stream = try_stream! {
            let provider = resolved?;
            let family = provider.family();
            let max_rounds = config.max_rounds();
            let limit = config.turn_timeout();
            let deadline = Instant::now() + limit;

            let tool_defs = list_tool_definitions(tools.as_ref()).await;
            info!(
                provider = %provider.provider_id(),
                family = %family,
                tools = tool_defs.len(),
                "Starting chat turn"
            );

            let mut history = vec![Message::user(user_message.clone())];
            let mut usage = Usage::default();

            for round in 1..=max_rounds {
                debug!(round, "Starting chat round");
                let options = GenerateOptions {
                    temperature: config.temperature,
                    max_tokens: Some(config.max_tokens()),
                    system: config.system.clone(),
                    tools: tool_defs.clone(),
                };

                let mut fragments = timeout_at(
                    deadline,
                    open_round(&provider, history.clone(), options, streaming),
                )
                .await
                .map_err(|_| CoreError::TurnTimeout(limit))??;

                let mut text = String::new();
                let mut finish_reason = None;
                let mut accumulator = ToolCallAccumulator::new();

                while let Some(fragment) = timeout_at(deadline, fragments.next())
                    .await
                    .map_err(|_| CoreError::TurnTimeout(limit))?
                {
                    let fragment = fragment?;
                    if let Some(content) = fragment.content.filter(|c| !c.is_empty()) {
                        text.push_str(&content);
                        yield ChatEvent::Text(content);
                    }
                    accumulator.extend(fragment.tool_calls);
                    if let Some(round_usage) = fragment.usage {
                        usage.merge(&round_usage);
                    }
                    if let Some(reason) = fragment.finish_reason {
                        finish_reason = Some(reason);
                        yield ChatEvent::Finish(reason);
                    }
                }

                let calls = accumulator.finish();
                let execute = family.wants_tool_execution(finish_reason, !calls.is_empty());

                // History only records calls that get a matching tool result.
                let recorded: &[ToolCall] = if execute { &calls } else { &[] };
                if !text.is_empty() || !recorded.is_empty() {
                    history.push(Message::assistant_turn(&text, recorded));
                }

                if !execute {
                    if !calls.is_empty() {
                        warn!(
                            round,
                            calls = calls.len(),
                            finish_reason = ?finish_reason,
                            "Tool calls without a tool-use finish reason, not executing"
                        );
                    }
                    info!(rounds = round, tokens = usage.total(), "Chat turn finished");
                    yield ChatEvent::Done(ChatSummary {
                        text,
                        finish_reason,
                        rounds: round,
                        usage,
                        history,
                    });
                    return;
                }

                info!(round, calls = calls.len(), "Executing tool calls");
                for call in calls {
                    let ToolCall { id, name, mut arguments } = call;
                    if arguments.is_empty() {
                        if let Some(repaired) = repair_arguments(&name, &user_message) {
                            arguments = repaired;
                        }
                    }

                    yield ChatEvent::ToolMarker(ToolMarker {
                        call_id: id.clone(),
                        tool: name.clone(),
                        kind: ToolMarkerKind::Started,
                    });

                    let outcome = timeout_at(deadline, tools.call_tool(&name, arguments))
                        .await
                        .map_err(|_| CoreError::TurnTimeout(limit))?;

                    let (content, is_error) = match outcome {
                        Ok(result) => (result.text_content(), result.is_error),
                        Err(e) => {
                            warn!(tool = %name, error = %e, "Tool execution failed");
                            (format!("Error: {e}"), true)
                        }
                    };
                    let kind = if is_error {
                        ToolMarkerKind::Failed(content.clone())
                    } else {
                        ToolMarkerKind::Completed
                    };
                    yield ChatEvent::ToolMarker(ToolMarker {
                        call_id: id.clone(),
                        tool: name,
                        kind,
                    });

                    history.push(family.tool_result_message(&id, content, is_error));
                }
            }

            warn!(max_rounds, "Chat turn hit the round limit");
            Err::<(), _>(CoreError::RoundLimitExceeded { max_rounds })?;
        };
        stream.boxed()
    }
}

/// Open one provider round as a fragment stream.
async fn open_round(
    provider: &BoxedChatProvider,
    messages: Vec<Message>,
    options: GenerateOptions,
    streaming: bool,
) -> Result<FragmentStream, ProviderError> {
    if streaming && provider.supports_streaming() {
        return provider.stream(messages, options).await;
    }
    let response = provider.complete(messages, options).await?;
    let fragments = response.into_fragments().into_iter().map(Ok);
    Ok(futures::stream::iter(fragments).boxed())
}

/// Tool descriptors for the model. A listing failure leaves the turn without tools.
async fn list_tool_definitions(tools: &dyn ToolExecutor) -> Vec<ToolDefinition> {
    match tools.list_tools().await {
        Ok(listed) => listed.into_iter().map(tool_definition).collect(),
        Err(e) => {
            warn!(error = %e, "Failed to list tools, continuing without tools");
            Vec::new()
        }
    }
}

fn tool_definition(tool: McpTool) -> ToolDefinition {
    ToolDefinition {
        name: tool.name,
        description: tool.description.unwrap_or_default(),
        parameters: tool
            .input_schema
            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
    }
}
