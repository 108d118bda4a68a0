#![allow(clippy::unwrap_used, clippy::expect_used)]
//! The exact wire shape each harness sends upstream: auth and routing
//! headers, payload fields, and how the neutral turn's messages and tools
//! land in each provider's format.

use std::sync::Arc;

use futures::StreamExt;
use openclaw_core::AnthropicHarness;
use openclaw_core::CodexHarness;
use openclaw_core::Harness;
use openclaw_core::OpenAiCompatHarness;
use openclaw_core::StaticToken;
use openclaw_protocol::Event;
use openclaw_protocol::Role;
use openclaw_protocol::ToolSpec;
use openclaw_protocol::Turn;
use openclaw_protocol::TurnMessage;
use serde_json::Value;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

fn exec_tool() -> ToolSpec {
    ToolSpec {
        name: "exec".to_string(),
        description: "Runs a command".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "command": {"type": "string"},
                "workdir": {"type": ["string", "null"]},
            },
            "required": ["command", "workdir"],
            "additionalProperties": false,
        }),
        strict: true,
    }
}

fn full_turn(model: &str) -> Turn {
    Turn {
        model: model.to_string(),
        instructions: "be careful".to_string(),
        messages: vec![
            TurnMessage::text(Role::User, "run ls"),
            TurnMessage::tool_call("call_1", "exec", "{\"command\":\"ls\"}"),
            TurnMessage::tool_output("call_1", "file.txt"),
            TurnMessage::text(Role::Assistant, "Done."),
        ],
        tools: vec![exec_tool()],
        tool_choice: Some("auto".to_string()),
        reasoning_effort: None,
        verbosity: None,
        session_key: Some("sess-42".to_string()),
    }
}

/// Drive the stream to its end so the request is fully observed.
async fn drain(harness: &dyn Harness, turn: &Turn) {
    let mut stream = harness
        .stream_turn(turn, CancellationToken::new())
        .await
        .expect("stream should open");
    while let Some(item) = stream.next().await {
        if matches!(item, Ok(Event::Done) | Err(_)) {
            break;
        }
    }
}

async fn first_request(server: &MockServer) -> (wiremock::Request, Value) {
    let requests = server.received_requests().await.unwrap();
    let request = requests.into_iter().next().unwrap();
    let body: Value = serde_json::from_slice(&request.body).unwrap();
    (request, body)
}

#[tokio::test]
async fn codex_request_carries_session_and_originator_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"r1\"}}\n\n",
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let harness = CodexHarness::new(
        server.uri(),
        Arc::new(StaticToken::new(
            Some("tok_abc".into()),
            Some("acct_1".into()),
        )),
    );
    drain(&harness, &full_turn("gpt-5")).await;

    let (request, body) = first_request(&server).await;
    let header = |name: &str| {
        request
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    assert_eq!(header("authorization"), "Bearer tok_abc");
    assert_eq!(header("session_id"), "sess-42");
    assert_eq!(header("chatgpt-account-id"), "acct_1");
    assert_eq!(header("openai-beta"), "responses=experimental");
    assert!(!header("originator").is_empty());

    assert_eq!(body["model"], "gpt-5");
    assert_eq!(body["instructions"], "be careful");
    assert_eq!(body["stream"], true);
    assert_eq!(body["store"], false);
    assert_eq!(body["prompt_cache_key"], "sess-42");
    assert_eq!(body["tool_choice"], "auto");

    let input = body["input"].as_array().unwrap();
    assert_eq!(input[0]["type"], "message");
    assert_eq!(input[0]["role"], "user");
    assert_eq!(input[0]["content"][0]["type"], "input_text");
    assert_eq!(input[1]["type"], "function_call");
    assert_eq!(input[1]["call_id"], "call_1");
    assert_eq!(input[2]["type"], "function_call_output");
    assert_eq!(input[2]["output"], "file.txt");
    assert_eq!(input[3]["type"], "message");
    assert_eq!(input[3]["content"][0]["type"], "output_text");

    let tool = &body["tools"][0];
    assert_eq!(tool["type"], "function");
    assert_eq!(tool["name"], "exec");
    assert_eq!(tool["strict"], true);
    assert_eq!(tool["parameters"]["additionalProperties"], json!(false));
}

#[tokio::test]
async fn anthropic_request_uses_messages_wire_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"type\":\"message_stop\"}\n\n",
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let harness = AnthropicHarness::new(
        server.uri(),
        Arc::new(StaticToken::new(Some("oauth_tok".into()), None)),
    );
    drain(&harness, &full_turn("claude-sonnet-4-5")).await;

    let (request, body) = first_request(&server).await;
    assert_eq!(
        request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok()),
        Some("Bearer oauth_tok")
    );
    assert!(request.headers.get("anthropic-version").is_some());

    assert_eq!(body["model"], "claude-sonnet-4-5");
    assert_eq!(body["system"], "be careful");
    assert_eq!(body["stream"], true);
    assert!(body["max_tokens"].as_u64().unwrap() > 0);

    let messages = body["messages"].as_array().unwrap();
    // user text / assistant tool_use / user tool_result (+assistant text)
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"][0]["type"], "tool_use");
    assert_eq!(messages[1]["content"][0]["id"], "call_1");
    assert_eq!(messages[1]["content"][0]["input"]["command"], "ls");
    assert_eq!(messages[2]["role"], "user");
    assert_eq!(messages[2]["content"][0]["type"], "tool_result");
    assert_eq!(messages[2]["content"][0]["tool_use_id"], "call_1");

    let tool = &body["tools"][0];
    assert_eq!(tool["name"], "exec");
    assert_eq!(tool["input_schema"]["type"], "object");
    assert_eq!(body["tool_choice"]["type"], "auto");
}

#[tokio::test]
async fn chat_compat_request_uses_function_envelopes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: [DONE]\n\n",
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let harness = OpenAiCompatHarness::new(
        "local",
        server.uri(),
        Some("sk-local".into()),
        vec!["llama".into()],
    );
    drain(&harness, &full_turn("llama-3")).await;

    let (request, body) = first_request(&server).await;
    assert_eq!(
        request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok()),
        Some("Bearer sk-local")
    );

    assert_eq!(body["stream"], true);
    assert_eq!(body["stream_options"]["include_usage"], true);

    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[0]["content"], "be careful");
    assert_eq!(messages[1]["role"], "user");
    assert_eq!(messages[2]["role"], "assistant");
    assert_eq!(messages[2]["tool_calls"][0]["id"], "call_1");
    assert_eq!(
        messages[2]["tool_calls"][0]["function"]["name"],
        "exec"
    );
    assert_eq!(messages[3]["role"], "tool");
    assert_eq!(messages[3]["tool_call_id"], "call_1");
    assert_eq!(messages[4]["role"], "assistant");
    assert_eq!(messages[4]["content"], "Done.");

    let tool = &body["tools"][0];
    assert_eq!(tool["type"], "function");
    assert_eq!(tool["function"]["name"], "exec");
    assert_eq!(tool["function"]["strict"], true);
}
