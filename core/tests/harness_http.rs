#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Provider-client behavior against a mock HTTP upstream: streaming,
//! retry discipline, and terminal error reporting.

use std::sync::Arc;

use futures::StreamExt;
use openclaw_core::CodexHarness;
use openclaw_core::GatewayErr;
use openclaw_core::Harness;
use openclaw_core::OpenAiCompatHarness;
use openclaw_core::StaticToken;
use openclaw_protocol::Event;
use openclaw_protocol::Role;
use openclaw_protocol::TokenUsage;
use openclaw_protocol::Turn;
use openclaw_protocol::TurnMessage;
use tokio_util::sync::CancellationToken;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

fn turn(model: &str) -> Turn {
    Turn {
        model: model.to_string(),
        messages: vec![TurnMessage::text(Role::User, "hi")],
        ..Default::default()
    }
}

fn sse(frames: &[&str]) -> String {
    frames
        .iter()
        .map(|f| format!("data: {f}\n\n"))
        .collect::<String>()
}

async fn drain(harness: &dyn Harness, turn: &Turn) -> Vec<Event> {
    let mut stream = harness
        .stream_turn(turn, CancellationToken::new())
        .await
        .expect("stream should open");
    let mut events = Vec::new();
    while let Some(item) = stream.next().await {
        let event = item.expect("stream item");
        let done = event == Event::Done;
        events.push(event);
        if done {
            break;
        }
    }
    events
}

fn codex_harness(server: &MockServer) -> CodexHarness {
    CodexHarness::new(
        server.uri(),
        Arc::new(StaticToken::new(Some("tok".into()), None)),
    )
}

#[tokio::test]
async fn codex_stream_round_trips_text_and_usage() {
    let server = MockServer::start().await;
    let body = sse(&[
        r#"{"type":"response.output_text.delta","delta":"Hel"}"#,
        r#"{"type":"response.output_text.delta","delta":"lo"}"#,
        r#"{"type":"response.completed","response":{"id":"r1","usage":{"input_tokens":3,"output_tokens":2}}}"#,
    ]);
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let events = drain(&codex_harness(&server), &turn("gpt-5")).await;
    assert_eq!(
        events,
        vec![
            Event::Text { delta: "Hel".into() },
            Event::Text { delta: "lo".into() },
            Event::Usage(TokenUsage {
                input_tokens: 3,
                output_tokens: 2,
            }),
            Event::Done,
        ]
    );
}

#[tokio::test]
async fn codex_retries_transient_500_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let body = sse(&[
        r#"{"type":"response.output_text.delta","delta":"ok"}"#,
        r#"{"type":"response.completed","response":{"id":"r1"}}"#,
    ]);
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let events = drain(&codex_harness(&server), &turn("gpt-5")).await;
    assert_eq!(events, vec![Event::Text { delta: "ok".into() }, Event::Done]);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn codex_surfaces_the_upstream_error_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string(r#"{"error":{"message":"Unknown parameter: 'foo'"}}"#),
        )
        .mount(&server)
        .await;

    let err = codex_harness(&server)
        .stream_turn(&turn("gpt-5"), CancellationToken::new())
        .await
        .expect_err("400 must be terminal");
    match err {
        GatewayErr::UnexpectedStatus(status, body) => {
            assert_eq!(status.as_u16(), 400);
            assert!(body.contains("Unknown parameter"), "body = {body}");
        }
        other => panic!("unexpected error: {other}"),
    }
    // No retries for a non-transient status.
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn codex_401_without_refreshable_credentials_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = codex_harness(&server)
        .stream_turn(&turn("gpt-5"), CancellationToken::new())
        .await
        .expect_err("401 must be terminal without refresh");
    assert!(matches!(err, GatewayErr::UnexpectedStatus(status, _) if status.as_u16() == 401));
}

#[tokio::test]
async fn chat_compat_stream_reassembles_tool_call() {
    let server = MockServer::start().await;
    let body = format!(
        "{}data: [DONE]\n\n",
        sse(&[
            r#"{"choices":[{"index":0,"delta":{"role":"assistant","tool_calls":[{"index":0,"id":"call_1","function":{"name":"exec","arguments":"{\"com"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"mand\":\"ls\"}"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":8,"completion_tokens":4}}"#,
        ])
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let harness = OpenAiCompatHarness::new("local", server.uri(), None, vec!["llama".into()]);
    let events = drain(&harness, &turn("llama-3")).await;
    assert_eq!(
        events,
        vec![
            Event::ToolCall {
                call_id: "call_1".into(),
                name: "exec".into(),
                arguments: "{\"command\":\"ls\"}".into(),
            },
            Event::Usage(TokenUsage {
                input_tokens: 8,
                output_tokens: 4,
            }),
            Event::Done,
        ]
    );
}

#[tokio::test]
async fn chat_compat_lists_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"object":"list","data":[{"id":"llama-3"},{"id":"qwen-2"}]}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let harness = OpenAiCompatHarness::new("local", server.uri(), None, vec!["llama".into()]);
    let models = harness.list_models().await.unwrap();
    let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["llama-3", "qwen-2"]);
    assert!(models.iter().all(|m| m.owned_by == "local"));
}

#[tokio::test]
async fn cancellation_interrupts_the_retry_sleep() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let harness = codex_harness(&server);
    let the_turn = turn("gpt-5");
    let cancel2 = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel2.cancel();
    });
    let err = harness
        .stream_turn(&the_turn, cancel)
        .await
        .expect_err("cancelled mid-retry");
    assert!(matches!(err, GatewayErr::Cancelled));
}
