//! Chat loop integration tests.
//!
//! Drives the chat service with scripted providers and recording tools.

use futures::StreamExt;
use mcpbridge_core::{ChatConfig, ChatEvent, ChatService, CoreError, ToolMarkerKind};
use mcpbridge_mcp::{ToolArguments, ToolBuilder, ToolHandler, ToolRegistry};
use mcpbridge_provider::{
    ArgumentsFragment, ChatFragment, ContentPart, FinishReason, ProviderError, ProviderFamily,
    ProviderRegistry, Role, ToolCallFragment, Usage,
};
use mcpbridge_test_utils::{init_tracing, RecordingProvider, RecordingToolExecutor};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn service(provider: &RecordingProvider, tools: &RecordingToolExecutor) -> ChatService {
    service_with_config(provider, tools, ChatConfig::default())
}

fn service_with_config(
    provider: &RecordingProvider,
    tools: &RecordingToolExecutor,
    config: ChatConfig,
) -> ChatService {
    let mut registry = ProviderRegistry::new().with_provider(Arc::new(provider.clone()));
    registry.set_default("scripted").unwrap();
    ChatService::new(registry, Arc::new(tools.clone()), config)
}

async fn collect(service: &ChatService, message: &str) -> Vec<Result<ChatEvent, CoreError>> {
    service.chat_stream(message, None).collect().await
}

fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap()
}

/// A call that arrives whole, name and structured arguments together.
fn structured_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCallFragment {
    ToolCallFragment {
        id: id.to_string(),
        name: Some(name.to_string()),
        arguments: Some(ArgumentsFragment::Object(object(arguments))),
    }
}

/// Text streams through, the tool runs, and a second request carries its result.
#[tokio::test]
async fn test_streamed_text_then_tool_round() {
    init_tracing();
    let provider = RecordingProvider::new("scripted")
        .with_fragments(vec![
            ChatFragment::text("Sure, "),
            ChatFragment::text("doing it"),
            ChatFragment::tool_calls(vec![structured_call(
                "call_1",
                "format_code",
                json!({"code": "x=1", "language": "python"}),
            )]),
            ChatFragment::finish(FinishReason::ToolUse),
            ChatFragment::usage(Usage::new(10, 5)),
        ])
        .with_response("Formatted: x = 1");
    let tools = RecordingToolExecutor::new().with_tool("format_code", "Format code", "x = 1");

    let events: Vec<ChatEvent> = collect(&service(&provider, &tools), "format x=1")
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let texts: Vec<String> = events
        .iter()
        .filter_map(|event| match event {
            ChatEvent::Text(text) => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["Sure, ", "doing it", "Formatted: x = 1"]);

    let markers: Vec<&ToolMarkerKind> = events
        .iter()
        .filter_map(|event| match event {
            ChatEvent::ToolMarker(marker) => Some(&marker.kind),
            _ => None,
        })
        .collect();
    assert_eq!(
        markers,
        vec![&ToolMarkerKind::Started, &ToolMarkerKind::Completed]
    );

    let invocations = tools.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].name, "format_code");
    assert_eq!(
        invocations[0].arguments,
        object(json!({"code": "x=1", "language": "python"}))
    );

    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].options.tools.len(), 1);
    let second = &calls[1].messages;
    assert_eq!(second.len(), 3);
    assert_eq!(second[1].role, Role::Assistant);
    assert_eq!(second[1].text(), "Sure, doing it");
    assert_eq!(second[2].role, Role::Tool);
    assert!(matches!(
        &second[2].content[0],
        ContentPart::ToolResult { tool_use_id, is_error: None, .. } if tool_use_id == "call_1"
    ));

    let Some(ChatEvent::Done(summary)) = events.last() else {
        panic!("turn did not finish");
    };
    assert_eq!(summary.text, "Formatted: x = 1");
    assert_eq!(summary.rounds, 2);
    assert_eq!(summary.usage, Usage::new(110, 55));
    assert_eq!(summary.history.len(), 4);
}

/// OpenAI-style argument text split over fragments is parsed before execution.
#[tokio::test]
async fn test_text_arguments_are_reassembled() {
    let provider = RecordingProvider::new("scripted")
        .with_fragments(vec![
            ChatFragment::tool_calls(vec![ToolCallFragment::start("c1", "calculate")]),
            ChatFragment::tool_calls(vec![ToolCallFragment::text_arguments(
                "c1",
                "{\"expression\":",
            )]),
            ChatFragment::tool_calls(vec![ToolCallFragment::text_arguments("c1", " \"2+2\"}")]),
            ChatFragment::finish(FinishReason::ToolUse),
        ])
        .with_response("4");
    let tools = RecordingToolExecutor::new().with_tool("calculate", "Evaluate", "4");

    let summary = service(&provider, &tools)
        .chat("what is 2+2", None)
        .await
        .unwrap();

    assert_eq!(summary.text, "4");
    assert_eq!(
        tools.invocations()[0].arguments,
        object(json!({"expression": "2+2"}))
    );
}

/// Empty arguments for a known tool are rebuilt from the user message.
#[tokio::test]
async fn test_empty_arguments_are_repaired() {
    let provider = RecordingProvider::new("scripted")
        .with_fragments(vec![
            ChatFragment::tool_calls(vec![ToolCallFragment::start("c1", "echo")]),
            ChatFragment::tool_calls(vec![ToolCallFragment::text_arguments("c1", "{")]),
            ChatFragment::finish(FinishReason::ToolUse),
        ])
        .with_response("done");
    let tools = RecordingToolExecutor::new().with_tool("echo", "Echo", "hello there");

    service(&provider, &tools)
        .chat("please echo \"hello there\"", None)
        .await
        .unwrap();

    assert_eq!(
        tools.invocations()[0].arguments,
        object(json!({"message": "hello there"}))
    );
}

/// A failing tool becomes an error result and the turn carries on.
#[tokio::test]
async fn test_tool_failure_is_fed_back() {
    let provider = RecordingProvider::new("scripted")
        .with_tool_call("c1", "deploy", json!({"target": "prod"}))
        .with_response("Deployment failed, sorry.");
    let tools = RecordingToolExecutor::new().with_failing_tool("deploy", "permission denied");

    let events: Vec<ChatEvent> = collect(&service(&provider, &tools), "deploy")
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert!(events.iter().any(|event| matches!(
        event,
        ChatEvent::ToolMarker(marker) if matches!(&marker.kind, ToolMarkerKind::Failed(e) if e.contains("permission denied"))
    )));

    let calls = provider.calls();
    let second = &calls[1].messages;
    assert!(matches!(
        &second[2].content[0],
        ContentPart::ToolResult { is_error: Some(true), .. }
    ));
    assert!(matches!(events.last(), Some(ChatEvent::Done(_))));
}

/// Tool calls are executed in the order they were first seen.
#[tokio::test]
async fn test_tools_run_in_first_seen_order() {
    let provider = RecordingProvider::new("scripted")
        .with_fragments(vec![
            ChatFragment::tool_calls(vec![
                ToolCallFragment::start("b", "second"),
                ToolCallFragment::start("a", "first"),
            ]),
            ChatFragment::tool_calls(vec![ToolCallFragment::text_arguments("a", "{}")]),
            ChatFragment::tool_calls(vec![ToolCallFragment::text_arguments("b", "{}")]),
            ChatFragment::finish(FinishReason::ToolUse),
        ])
        .with_response("ok");
    let tools = RecordingToolExecutor::new()
        .with_tool("first", "", "1")
        .with_tool("second", "", "2");

    service(&provider, &tools).chat("go", None).await.unwrap();
    assert_eq!(tools.invoked_names(), vec!["second", "first"]);
}

/// OpenAI-family calls without a tool-use finish reason are not executed.
#[tokio::test]
async fn test_openai_needs_tool_use_finish_reason() {
    let provider = RecordingProvider::new("scripted").with_fragments(vec![
        ChatFragment::text("Thinking about it"),
        ChatFragment::tool_calls(vec![ToolCallFragment::start("c1", "echo")]),
        ChatFragment::finish(FinishReason::EndTurn),
    ]);
    let tools = RecordingToolExecutor::new().with_tool("echo", "Echo", "hi");

    let summary = service(&provider, &tools).chat("hi", None).await.unwrap();
    assert_eq!(summary.rounds, 1);
    assert!(tools.invocations().is_empty());

    // The unexecuted call stays out of the history so it can be replayed.
    assert_eq!(summary.history.len(), 2);
    let reply = &summary.history[1];
    assert_eq!(reply.text(), "Thinking about it");
    assert_eq!(reply.tool_uses().count(), 0);
}

/// Anthropic-family calls run on presence alone, with user-role tool results.
#[tokio::test]
async fn test_anthropic_runs_tools_on_presence() {
    let provider = RecordingProvider::new("scripted")
        .with_family(ProviderFamily::Anthropic)
        .with_fragments(vec![
            ChatFragment::tool_calls(vec![structured_call(
                "toolu_1",
                "echo",
                json!({"message": "hi"}),
            )]),
            ChatFragment::finish(FinishReason::EndTurn),
        ])
        .with_response("Echoed.");
    let tools = RecordingToolExecutor::new().with_tool("echo", "Echo", "hi");

    let summary = service(&provider, &tools).chat("say hi", None).await.unwrap();
    assert_eq!(summary.rounds, 2);

    let calls = provider.calls();
    let second = &calls[1].messages;
    assert_eq!(second[2].role, Role::User);
    assert!(matches!(
        &second[2].content[0],
        ContentPart::ToolResult { tool_use_id, .. } if tool_use_id == "toolu_1"
    ));
}

/// Non-streaming providers run the same loop through `complete`.
#[tokio::test]
async fn test_non_streaming_provider_uses_complete() {
    let provider = RecordingProvider::new("scripted")
        .without_streaming()
        .with_tool_call("c1", "echo", json!({"message": "hi"}))
        .with_response("All done");
    let tools = RecordingToolExecutor::new().with_tool("echo", "Echo", "hi");

    let events: Vec<ChatEvent> = collect(&service(&provider, &tools), "hi")
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert!(provider.calls().iter().all(|call| !call.streamed));
    assert_eq!(events[0], ChatEvent::Finish(FinishReason::ToolUse));
    assert_eq!(
        events.last().and_then(|event| match event {
            ChatEvent::Done(summary) => Some(summary.text.as_str()),
            _ => None,
        }),
        Some("All done")
    );
}

/// Provider failures end the turn with an error.
#[tokio::test]
async fn test_provider_error_propagates() {
    let provider = RecordingProvider::new("scripted").with_error("upstream 500");
    let tools = RecordingToolExecutor::new();

    let result = service(&provider, &tools).chat("hi", None).await;
    assert!(matches!(
        result,
        Err(CoreError::Provider(ProviderError::Internal { .. }))
    ));
}

/// A stream that breaks mid-turn ends it, after the text already forwarded.
#[tokio::test]
async fn test_stream_failure_after_text() {
    let provider = RecordingProvider::new("scripted")
        .with_interrupted_stream(vec![ChatFragment::text("Half an ans")]);
    let tools = RecordingToolExecutor::new();

    let events = collect(&service(&provider, &tools), "hi").await;
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], Ok(ChatEvent::Text(text)) if text == "Half an ans"));
    assert!(matches!(
        events[1],
        Err(CoreError::Provider(ProviderError::StreamInterrupted))
    ));
    assert!(tools.invocations().is_empty());
}

struct SlowTool;

#[async_trait::async_trait]
impl ToolHandler for SlowTool {
    async fn call(&self, _arguments: ToolArguments) -> Result<String, String> {
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok("finally".to_string())
    }
}

/// The turn deadline also covers tool execution.
#[tokio::test]
async fn test_turn_timeout() {
    let provider = RecordingProvider::new("scripted")
        .with_tool_call("c1", "slow", json!({}))
        .with_response("never sent");
    let tools = ToolRegistry::new().with_tool(ToolBuilder::new("slow").build(SlowTool));
    let mut registry = ProviderRegistry::new().with_provider(Arc::new(provider.clone()));
    registry.set_default("scripted").unwrap();
    let config = ChatConfig {
        turn_timeout_secs: Some(1),
        ..Default::default()
    };

    let result = ChatService::new(registry, Arc::new(tools), config)
        .chat("go slow", None)
        .await;
    assert!(matches!(
        result,
        Err(CoreError::TurnTimeout(limit)) if limit == Duration::from_secs(1)
    ));
    assert_eq!(provider.call_count(), 1);
}

/// A model that never stops calling tools hits the round cap.
#[tokio::test]
async fn test_round_limit() {
    let mut provider = RecordingProvider::new("scripted");
    for i in 0..3 {
        provider = provider.with_tool_call(&format!("c{i}"), "echo", json!({"message": "again"}));
    }
    let tools = RecordingToolExecutor::new().with_tool("echo", "Echo", "again");
    let config = ChatConfig {
        max_rounds: Some(2),
        ..Default::default()
    };

    let result = service_with_config(&provider, &tools, config)
        .chat("loop", None)
        .await;
    assert!(matches!(
        result,
        Err(CoreError::RoundLimitExceeded { max_rounds: 2 })
    ));
    assert_eq!(provider.call_count(), 2);
    assert_eq!(tools.invocations().len(), 2);
}

/// A failed tool listing leaves the turn without tools.
#[tokio::test]
async fn test_tool_listing_failure_continues() {
    let provider = RecordingProvider::new("scripted").with_response("No tools today");
    let tools = RecordingToolExecutor::new().with_list_error("server down");

    let summary = service(&provider, &tools).chat("hi", None).await.unwrap();
    assert_eq!(summary.text, "No tools today");
    assert!(provider.calls()[0].options.tools.is_empty());
}

/// Unknown provider ids fail before any request.
#[tokio::test]
async fn test_unknown_provider() {
    let provider = RecordingProvider::new("scripted");
    let tools = RecordingToolExecutor::new();

    let result = service(&provider, &tools).chat("hi", Some("missing")).await;
    assert!(matches!(
        result,
        Err(CoreError::Provider(ProviderError::UnknownProvider(_)))
    ));
    assert_eq!(provider.call_count(), 0);
}
