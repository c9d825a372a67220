//! Depth-bounded tool invocation loop.
//!
//! An explicit iterative loop rather than recursion: each round sends the
//! transcript to the model, executes any requested tool calls, appends the
//! results as tool-role messages and resubmits. Resubmissions carry no tool
//! definitions so the model is steered toward a closing natural-language
//! answer; a model that keeps requesting tools anyway exhausts the depth
//! bound and the loop errors.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::domain::error::{ChainError, ChainResult};
use crate::domain::llm::{LlmProvider, LlmRequest, LlmResponse, Message, ToolCall, Usage};
use crate::domain::tool::{Tool, ToolRegistry};

/// The loop's final response plus the usage of every model round-trip, in
/// order, for metadata accounting.
#[derive(Debug)]
pub struct ToolLoopResult {
    pub response: LlmResponse,
    pub round_trips: Vec<(String, Option<Usage>)>,
}

/// Drive the conversation until the model stops requesting tools or the
/// depth bound is exhausted.
pub async fn run_tool_loop(
    provider: &Arc<dyn LlmProvider>,
    initial_request: LlmRequest,
    tools: &ToolRegistry,
    max_depth: u32,
) -> ChainResult<ToolLoopResult> {
    let mut request = initial_request;
    let mut round_trips = Vec::new();

    for depth in 0..max_depth {
        let response = provider.chat(request.clone()).await?;
        round_trips.push((response.provider.clone(), response.usage));

        if !response.has_tool_calls() {
            return Ok(ToolLoopResult {
                response,
                round_trips,
            });
        }

        debug!(
            depth,
            calls = response.tool_calls.len(),
            "executing model-requested tool calls"
        );

        let mut next = request.without_tools();
        next.messages.push(Message::assistant_with_tool_calls(
            response.content.clone(),
            response.tool_calls.clone(),
        ));
        for call in &response.tool_calls {
            next.messages
                .push(Message::tool(call.id.clone(), execute_call(tools, call)));
        }
        request = next;
    }

    Err(ChainError::MaxToolDepthExceeded { max_depth })
}

/// Run one requested call and serialize its outcome. Failures, including an
/// unknown tool name, become the result content rather than aborting the
/// loop.
fn execute_call(tools: &ToolRegistry, call: &ToolCall) -> String {
    let Some(tool) = tools.get(&call.name) else {
        warn!(tool = %call.name, "model requested unknown tool");
        return ChainError::tool_not_found(&call.name).to_string();
    };

    let args = canonical_arguments(tool, &call.arguments);
    match tool.call(args) {
        Ok(value) => serialize_result(&value),
        Err(e) => e.to_string(),
    }
}

/// Re-key raw model arguments onto the tool's declared parameter
/// identifiers where a case-insensitive match exists; unmatched keys pass
/// through unchanged.
fn canonical_arguments(tool: &Tool, raw: &Value) -> Map<String, Value> {
    let Some(object) = raw.as_object() else {
        return Map::new();
    };

    object
        .iter()
        .map(|(key, value)| {
            let name = tool
                .parameters()
                .canonical_name(key)
                .map(str::to_string)
                .unwrap_or_else(|| key.clone());
            (name, value.clone())
        })
        .collect()
}

/// Strings pass through verbatim; everything else is JSON-encoded, with a
/// debug rendering as the last resort.
fn serialize_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::mock::MockLlmProvider;
    use crate::domain::llm::{FinishReason, ToolChoice};
    use crate::domain::tool::{ParameterSpec, ToolParameters};
    use serde_json::json;

    fn weather_tool() -> Tool {
        Tool::new(
            "get_weather",
            ToolParameters::new()
                .with_parameter("city", ParameterSpec::string().required()),
            |args| Ok(json!(format!("Sunny in {}", args["city"].as_str().unwrap()))),
        )
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new().with_tool(weather_tool())
    }

    fn tool_call_response(call: ToolCall) -> LlmResponse {
        LlmResponse::new("id-1", "mock-model", "mock", "").with_tool_calls(vec![call])
    }

    fn request_with_tools(tools: &ToolRegistry) -> LlmRequest {
        LlmRequest::builder()
            .user("What's the weather in Oslo?")
            .tools(tools.definitions())
            .build()
    }

    #[tokio::test]
    async fn test_loop_executes_tool_and_returns_final_answer() {
        let tools = registry();
        let provider: Arc<dyn LlmProvider> = Arc::new(
            MockLlmProvider::new("mock")
                .with_response(tool_call_response(ToolCall::new(
                    "c1",
                    "get_weather",
                    json!({"city": "Oslo"}),
                )))
                .with_response(
                    LlmResponse::new("id-2", "mock-model", "mock", "It is sunny in Oslo.")
                        .with_finish_reason(FinishReason::Stop),
                ),
        );

        let result = run_tool_loop(&provider, request_with_tools(&tools), &tools, 5)
            .await
            .expect("loop");

        assert_eq!(result.response.content, "It is sunny in Oslo.");
        assert_eq!(result.round_trips.len(), 2);
    }

    #[tokio::test]
    async fn test_resubmission_carries_tool_result_without_definitions() {
        let tools = registry();
        let mock = Arc::new(
            MockLlmProvider::new("mock")
                .with_response(tool_call_response(ToolCall::new(
                    "c1",
                    "get_weather",
                    json!({"City": "Oslo"}),
                )))
                .with_response(LlmResponse::new("id-2", "mock-model", "mock", "done")),
        );
        let provider: Arc<dyn LlmProvider> = mock.clone();

        run_tool_loop(&provider, request_with_tools(&tools), &tools, 5)
            .await
            .expect("loop");

        let resubmitted = mock.last_request().expect("request");
        assert!(resubmitted.tools.is_empty());
        assert_eq!(resubmitted.tool_choice, ToolChoice::None);

        // Transcript: user, assistant tool-call, tool result. The raw
        // "City" key was re-keyed onto the declared "city" parameter.
        assert_eq!(resubmitted.messages.len(), 3);
        let tool_message = &resubmitted.messages[2];
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(tool_message.content, "Sunny in Oslo");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_embedded_not_fatal() {
        let tools = registry();
        let mock = Arc::new(
            MockLlmProvider::new("mock")
                .with_response(tool_call_response(ToolCall::new(
                    "c1",
                    "no_such_tool",
                    json!({}),
                )))
                .with_response(LlmResponse::new("id-2", "mock-model", "mock", "ok")),
        );
        let provider: Arc<dyn LlmProvider> = mock.clone();

        let result = run_tool_loop(&provider, request_with_tools(&tools), &tools, 5)
            .await
            .expect("loop survives unknown tool");
        assert_eq!(result.response.content, "ok");

        let resubmitted = mock.last_request().unwrap();
        assert!(resubmitted.messages[2].content.contains("no_such_tool"));
    }

    #[tokio::test]
    async fn test_depth_bound_terminates_loop() {
        let tools = registry();
        // The mock repeats its last scripted response, so the model requests
        // tools forever.
        let mock = Arc::new(MockLlmProvider::new("mock").with_response(tool_call_response(
            ToolCall::new("c1", "get_weather", json!({"city": "Oslo"})),
        )));
        let provider: Arc<dyn LlmProvider> = mock.clone();

        let err = run_tool_loop(&provider, request_with_tools(&tools), &tools, 3)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ChainError::MaxToolDepthExceeded { max_depth: 3 }
        ));
        assert_eq!(mock.call_count(), 3);
    }

    #[test]
    fn test_serialize_result_forms() {
        assert_eq!(serialize_result(&json!("plain")), "plain");
        assert_eq!(serialize_result(&json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(serialize_result(&json!(42)), "42");
    }

    #[test]
    fn test_tool_failure_is_embedded() {
        let failing = Tool::new("boom", ToolParameters::new(), |_| {
            Err(ChainError::transform("handler blew up"))
        });
        let tools = ToolRegistry::new().with_tool(failing);
        let call = ToolCall::new("c1", "boom", json!({}));

        let content = execute_call(&tools, &call);
        assert!(content.contains("handler blew up"));
    }
}
