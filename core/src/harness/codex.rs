//! Harness for the ChatGPT-backed "codex" Responses endpoint.

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::Stream;
use futures::StreamExt;
use futures::TryStreamExt;
use openclaw_protocol::Event;
use openclaw_protocol::Role;
use openclaw_protocol::TokenUsage;
use openclaw_protocol::Turn;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::Harness;
use super::ModelInfo;
use super::cancellable_sleep;
use super::retry_after;
use crate::auth::CredentialSource;
use crate::collector::Collector;
use crate::error::GatewayErr;
use crate::error::Result;
use crate::flags::OPENCLAW_ORIGINATOR;
use crate::flags::OPENCLAW_REQUEST_MAX_RETRIES;
use crate::flags::OPENCLAW_STREAM_IDLE_TIMEOUT_MS;
use crate::sse::EventStream;
use crate::sse::SseEvent;
use crate::util::excerpt;
use crate::util::retry_delay;

const MODEL_PREFIXES: &[&str] = &["gpt-", "codex-", "o3", "o4-"];

const ALIASES: &[(&str, &str)] = &[
    ("codex", "codex-mini-latest"),
    ("gpt", "gpt-5"),
];

/// The backend has no public model listing, so the harness advertises a
/// static set.
const KNOWN_MODELS: &[&str] = &["gpt-5", "gpt-5-codex", "codex-mini-latest", "o3"];

/// Request payload for the Responses wire format.
#[derive(Debug, Serialize)]
struct ResponsesApiRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: Vec<Value>,
    tools: Vec<Value>,
    tool_choice: &'a str,
    parallel_tool_calls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<Value>,
    store: bool,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_cache_key: Option<&'a str>,
}

pub struct CodexHarness {
    client: reqwest::Client,
    base_url: String,
    creds: Arc<dyn CredentialSource>,
}

impl CodexHarness {
    pub fn new(base_url: impl Into<String>, creds: Arc<dyn CredentialSource>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            creds,
        }
    }

    fn build_input(turn: &Turn) -> Vec<Value> {
        let mut input = Vec::with_capacity(turn.messages.len());
        for message in &turn.messages {
            match message.role {
                Role::Tool => {
                    let call_id = message.tool_id.as_deref().unwrap_or("");
                    input.push(json!({
                        "type": "function_call_output",
                        "call_id": call_id,
                        "output": message.content,
                    }));
                }
                Role::Assistant if message.is_tool_call() => {
                    input.push(json!({
                        "type": "function_call",
                        "call_id": message.tool_id,
                        "name": message.name,
                        "arguments": message.content,
                    }));
                }
                Role::Assistant => {
                    input.push(json!({
                        "type": "message",
                        "role": "assistant",
                        "content": [{"type": "output_text", "text": message.content}],
                    }));
                }
                Role::System | Role::User => {
                    let role = match message.role {
                        Role::System => "system",
                        _ => "user",
                    };
                    input.push(json!({
                        "type": "message",
                        "role": role,
                        "content": [{"type": "input_text", "text": message.content}],
                    }));
                }
            }
        }
        input
    }

    fn build_tools(turn: &Turn) -> Vec<Value> {
        turn.tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "name": tool.name,
                    "description": tool.description,
                    "strict": tool.strict,
                    "parameters": tool.parameters,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Harness for CodexHarness {
    fn name(&self) -> &str {
        "codex"
    }

    fn matches_model(&self, model: &str) -> bool {
        let lowered = model.to_lowercase();
        MODEL_PREFIXES
            .iter()
            .any(|p| lowered == p.trim_end_matches('-') || lowered.starts_with(p))
    }

    fn expand_alias<'a>(&self, model: &'a str) -> Cow<'a, str> {
        let lowered = model.to_lowercase();
        for (alias, expansion) in ALIASES {
            if lowered == *alias {
                return Cow::Owned((*expansion).to_string());
            }
        }
        Cow::Borrowed(model)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(KNOWN_MODELS
            .iter()
            .map(|id| ModelInfo {
                id: (*id).to_string(),
                owned_by: "openai".to_string(),
            })
            .collect())
    }

    async fn stream_turn(&self, turn: &Turn, cancel: CancellationToken) -> Result<EventStream> {
        let reasoning = turn
            .reasoning_effort
            .as_deref()
            .map(|effort| json!({"effort": effort}));
        let payload = ResponsesApiRequest {
            model: &turn.model,
            instructions: &turn.instructions,
            input: Self::build_input(turn),
            tools: Self::build_tools(turn),
            tool_choice: turn.tool_choice.as_deref().unwrap_or("auto"),
            parallel_tool_calls: false,
            reasoning,
            store: false,
            stream: true,
            prompt_cache_key: turn.session_key.as_deref(),
        };

        let url = format!("{}/responses", self.base_url.trim_end_matches('/'));
        trace!("POST {url}: {}", serde_json::to_string(&payload)?);

        let mut attempt = 0;
        let mut refreshed = false;
        loop {
            attempt += 1;

            let Some(bearer) = self.creds.bearer() else {
                return Err(GatewayErr::Auth("codex credentials not configured".into()));
            };
            let mut req = self
                .client
                .post(&url)
                .bearer_auth(bearer)
                .header("OpenAI-Beta", "responses=experimental")
                .header("originator", *OPENCLAW_ORIGINATOR)
                .header(reqwest::header::ACCEPT, "text/event-stream");
            if let Some(session) = &turn.session_key {
                req = req.header("session_id", session);
            }
            if let Some(account) = self.creds.account_id() {
                req = req.header("chatgpt-account-id", account);
            }

            let res = tokio::select! {
                _ = cancel.cancelled() => return Err(GatewayErr::Cancelled),
                res = req.json(&payload).send() => res,
            };
            match res {
                Ok(resp) if resp.status().is_success() => {
                    let (tx_event, stream) = EventStream::channel(16);
                    let bytes = resp.bytes_stream().map_err(GatewayErr::Reqwest);
                    tokio::spawn(process_responses_sse(bytes, tx_event, cancel));
                    return Ok(stream);
                }
                Ok(res) => {
                    let status = res.status();
                    if status == StatusCode::UNAUTHORIZED && !refreshed {
                        refreshed = true;
                        if self.creds.refresh().await?.is_some() {
                            debug!("refreshed codex credentials after 401");
                            continue;
                        }
                    }
                    if !(status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()) {
                        // Keep the body so the upstream's own message reaches
                        // the caller instead of an opaque status line.
                        let body = (res.text().await).unwrap_or_default();
                        return Err(GatewayErr::UnexpectedStatus(status, excerpt(&body)));
                    }
                    if attempt > *OPENCLAW_REQUEST_MAX_RETRIES {
                        return Err(GatewayErr::RetryLimit(status));
                    }
                    let delay = retry_after(&res).unwrap_or_else(|| retry_delay(attempt));
                    cancellable_sleep(delay, &cancel).await?;
                }
                Err(e) => {
                    if attempt > *OPENCLAW_REQUEST_MAX_RETRIES {
                        return Err(e.into());
                    }
                    cancellable_sleep(retry_delay(attempt), &cancel).await?;
                }
            }
        }
    }
}

fn item_str<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key).and_then(|v| v.as_str())
}

/// Emit the reassembled call for `call_id` unless it already went out.
async fn emit_call(
    collector: &mut Collector,
    call_id: &str,
    fallback_name: Option<&str>,
    tx_event: &mpsc::Sender<Result<Event>>,
) -> bool {
    if !collector.should_emit(call_id) {
        return true;
    }
    let name = collector
        .name_for_call(call_id)
        .or(fallback_name)
        .unwrap_or("")
        .to_string();
    let arguments = collector.args_for_call(call_id).to_string();
    tx_event
        .send(Ok(Event::ToolCall {
            call_id: call_id.to_string(),
            name,
            arguments,
        }))
        .await
        .is_ok()
}

/// Translate the Responses SSE stream into neutral events, reassembling
/// function-call arguments through the collector.
async fn process_responses_sse<S>(
    stream: S,
    tx_event: mpsc::Sender<Result<Event>>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let mut stream = stream.eventsource();
    let idle_timeout = *OPENCLAW_STREAM_IDLE_TIMEOUT_MS;
    let mut collector = Collector::new();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = timeout(idle_timeout, stream.next()) => next,
        };
        let sse = match next {
            Ok(Some(Ok(sse))) => sse,
            Ok(Some(Err(e))) => {
                debug!("SSE error: {e:#}");
                let _ = tx_event.send(Err(GatewayErr::Stream(e.to_string()))).await;
                return;
            }
            Ok(None) => {
                let _ = tx_event
                    .send(Err(GatewayErr::Stream(
                        "stream closed before response.completed".into(),
                    )))
                    .await;
                return;
            }
            Err(_) => {
                let _ = tx_event
                    .send(Err(GatewayErr::Stream("idle timeout waiting for SSE".into())))
                    .await;
                return;
            }
        };

        let event = match SseEvent::decode(&sse.data) {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                debug!("failed to parse SSE event: {e}, data: {}", &sse.data);
                continue;
            }
            None => continue,
        };

        trace!(kind = event.kind.as_str(), "sse event");
        match event.kind.as_str() {
            "response.output_item.added" => {
                let Some(item) = &event.item else { continue };
                if item_str(item, "type") == Some("function_call")
                    && let Some(call_id) = item_str(item, "call_id")
                {
                    collector.record_call_added(
                        item_str(item, "id"),
                        call_id,
                        item_str(item, "name"),
                        item_str(item, "arguments"),
                    );
                }
            }
            "response.function_call_arguments.delta" => {
                if let Some(delta) = &event.delta {
                    collector.record_args_delta(
                        event.call_id.as_deref(),
                        event.item_id.as_deref(),
                        delta,
                    );
                }
            }
            "response.function_call_arguments.done" => {
                let resolved = collector.record_args_done(
                    event.call_id.as_deref(),
                    event.item_id.as_deref(),
                    event.arguments.as_deref(),
                );
                if let Some(call_id) = resolved
                    && !emit_call(&mut collector, &call_id, event.name.as_deref(), &tx_event).await
                {
                    return;
                }
            }
            "response.output_item.done" => {
                let Some(item) = &event.item else { continue };
                if item_str(item, "type") != Some("function_call") {
                    continue;
                }
                let call_id = item_str(item, "call_id")
                    .map(str::to_string)
                    .or_else(|| {
                        item_str(item, "id")
                            .and_then(|id| collector.call_id_for_item(id))
                            .map(str::to_string)
                    });
                let Some(call_id) = call_id else { continue };
                collector.record_call_added(
                    item_str(item, "id"),
                    &call_id,
                    item_str(item, "name"),
                    item_str(item, "arguments"),
                );
                if !emit_call(&mut collector, &call_id, item_str(item, "name"), &tx_event).await {
                    return;
                }
            }
            "response.content_part.added" => {
                let text = event
                    .part
                    .as_ref()
                    .filter(|p| p.get("type").and_then(Value::as_str) == Some("output_text"))
                    .and_then(|p| p.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if !text.is_empty() {
                    collector.record_text_delta(text);
                    if tx_event
                        .send(Ok(Event::Text {
                            delta: text.to_string(),
                        }))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
            "response.output_text.delta" => {
                if let Some(delta) = &event.delta {
                    collector.record_text_delta(delta);
                    if tx_event
                        .send(Ok(Event::Text {
                            delta: delta.clone(),
                        }))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
            "response.reasoning_summary_text.delta" | "response.reasoning_text.delta" => {
                if let Some(delta) = &event.delta
                    && tx_event
                        .send(Ok(Event::Thinking {
                            delta: delta.clone(),
                        }))
                        .await
                        .is_err()
                {
                    return;
                }
            }
            "response.completed" => {
                // Calls the upstream never closed individually still go out
                // before the terminal events.
                for call_id in collector.unemitted_calls() {
                    if !emit_call(&mut collector, &call_id, None, &tx_event).await {
                        return;
                    }
                }
                let usage = event
                    .response
                    .as_ref()
                    .and_then(|r| r.get("usage"))
                    .map(|usage| TokenUsage {
                        input_tokens: usage
                            .get("input_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0),
                        output_tokens: usage
                            .get("output_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0),
                    });
                if let Some(usage) = usage {
                    let _ = tx_event.send(Ok(Event::Usage(usage))).await;
                }
                let _ = tx_event.send(Ok(Event::Done)).await;
                return;
            }
            "response.failed" | "error" => {
                let message = event
                    .error
                    .as_ref()
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .or_else(|| {
                        event
                            .response
                            .as_ref()
                            .and_then(|r| r.pointer("/error/message"))
                            .and_then(Value::as_str)
                    })
                    .unwrap_or("upstream reported a failure")
                    .to_string();
                warn!(message = message.as_str(), "upstream response failed");
                let _ = tx_event.send(Ok(Event::Error { message })).await;
                let _ = tx_event.send(Ok(Event::Done)).await;
                return;
            }
            other => debug!(other, "ignoring sse event"),
        }
    }
}
