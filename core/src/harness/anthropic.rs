//! Harness for the Anthropic Messages endpoint.

use std::borrow::Cow;
use std::collections::HashMap;
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
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use super::Harness;
use super::ModelInfo;
use super::cancellable_sleep;
use super::retry_after;
use crate::auth::CredentialSource;
use crate::error::GatewayErr;
use crate::error::Result;
use crate::flags::ANTHROPIC_MAX_TOKENS;
use crate::flags::ANTHROPIC_VERSION;
use crate::flags::OPENCLAW_REQUEST_MAX_RETRIES;
use crate::flags::OPENCLAW_STREAM_IDLE_TIMEOUT_MS;
use crate::sse::EventStream;
use crate::util::excerpt;
use crate::util::retry_delay;

const ALIASES: &[(&str, &str)] = &[
    ("sonnet", "claude-sonnet-4-5"),
    ("opus", "claude-opus-4-1"),
    ("haiku", "claude-haiku-4-5"),
];

const KNOWN_MODELS: &[&str] = &["claude-sonnet-4-5", "claude-opus-4-1", "claude-haiku-4-5"];

/// Streamed Messages events, per the Anthropic streaming contract.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessagesStreamEvent {
    MessageStart { message: MessageStart },
    ContentBlockStart { index: usize, content_block: ContentBlock },
    ContentBlockDelta { index: usize, delta: ContentBlockDelta },
    ContentBlockStop { index: usize },
    MessageDelta { usage: DeltaUsage },
    MessageStop,
    Ping,
    Error { error: Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    #[serde(default)]
    usage: StartUsage,
}

#[derive(Debug, Default, Deserialize)]
struct StartUsage {
    #[serde(default)]
    input_tokens: u64,
}

#[derive(Debug, Default, Deserialize)]
struct DeltaUsage {
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {},
    ToolUse { id: String, name: String },
    Thinking {},
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    #[serde(other)]
    Other,
}

pub struct AnthropicHarness {
    client: reqwest::Client,
    base_url: String,
    creds: Arc<dyn CredentialSource>,
}

impl AnthropicHarness {
    pub fn new(base_url: impl Into<String>, creds: Arc<dyn CredentialSource>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            creds,
        }
    }

    /// Fold the neutral message sequence into Messages-shaped turns.
    /// Consecutive entries that land on the same wire role are merged into
    /// one message with multiple content blocks, which also covers tool
    /// results (user-role `tool_result` blocks).
    fn build_messages(turn: &Turn) -> Vec<Value> {
        let mut merged: Vec<(&'static str, Vec<Value>)> = Vec::new();
        let mut push = |role: &'static str, block: Value| match merged.last_mut() {
            Some((last_role, blocks)) if *last_role == role => blocks.push(block),
            _ => merged.push((role, vec![block])),
        };
        for message in &turn.messages {
            match message.role {
                Role::Assistant if message.is_tool_call() => {
                    let input: Value = serde_json::from_str(&message.content)
                        .unwrap_or_else(|_| json!({}));
                    push(
                        "assistant",
                        json!({
                            "type": "tool_use",
                            "id": message.tool_id,
                            "name": message.name,
                            "input": input,
                        }),
                    );
                }
                Role::Assistant => {
                    push("assistant", json!({"type": "text", "text": message.content}));
                }
                Role::Tool => {
                    push(
                        "user",
                        json!({
                            "type": "tool_result",
                            "tool_use_id": message.tool_id,
                            "content": message.content,
                        }),
                    );
                }
                Role::System | Role::User => {
                    push("user", json!({"type": "text", "text": message.content}));
                }
            }
        }
        merged
            .into_iter()
            .map(|(role, blocks)| json!({"role": role, "content": blocks}))
            .collect()
    }

    fn build_tools(turn: &Turn) -> Vec<Value> {
        turn.tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.parameters,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Harness for AnthropicHarness {
    fn name(&self) -> &str {
        "claude"
    }

    fn matches_model(&self, model: &str) -> bool {
        model.to_lowercase().starts_with("claude-")
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
                owned_by: "anthropic".to_string(),
            })
            .collect())
    }

    async fn stream_turn(&self, turn: &Turn, cancel: CancellationToken) -> Result<EventStream> {
        let mut payload = json!({
            "model": turn.model,
            "max_tokens": *ANTHROPIC_MAX_TOKENS,
            "stream": true,
            "messages": Self::build_messages(turn),
        });
        if !turn.instructions.is_empty() {
            payload["system"] = Value::String(turn.instructions.clone());
        }
        let tools = Self::build_tools(turn);
        if !tools.is_empty() {
            payload["tools"] = Value::Array(tools);
            if let Some(choice) = turn.tool_choice.as_deref() {
                payload["tool_choice"] = match choice {
                    "required" | "any" => json!({"type": "any"}),
                    _ => json!({"type": "auto"}),
                };
            }
        }

        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        trace!("POST {url}: {}", payload);

        let mut attempt = 0;
        let mut refreshed = false;
        loop {
            attempt += 1;

            let Some(bearer) = self.creds.bearer() else {
                return Err(GatewayErr::Auth(
                    "anthropic credentials not configured".into(),
                ));
            };
            let req = self
                .client
                .post(&url)
                .bearer_auth(bearer)
                .header("anthropic-version", *ANTHROPIC_VERSION)
                .header(reqwest::header::ACCEPT, "text/event-stream");

            let res = tokio::select! {
                _ = cancel.cancelled() => return Err(GatewayErr::Cancelled),
                res = req.json(&payload).send() => res,
            };
            match res {
                Ok(resp) if resp.status().is_success() => {
                    let (tx_event, stream) = EventStream::channel(16);
                    let bytes = resp.bytes_stream().map_err(GatewayErr::Reqwest);
                    tokio::spawn(process_messages_sse(bytes, tx_event, cancel));
                    return Ok(stream);
                }
                Ok(res) => {
                    let status = res.status();
                    if status == StatusCode::UNAUTHORIZED && !refreshed {
                        refreshed = true;
                        if self.creds.refresh().await?.is_some() {
                            debug!("refreshed anthropic credentials after 401");
                            continue;
                        }
                    }
                    if !(status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()) {
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

/// Per-index state for an in-flight `tool_use` block.
#[derive(Debug)]
struct ToolUseState {
    id: String,
    name: String,
    input_json: String,
}

async fn process_messages_sse<S>(
    stream: S,
    tx_event: mpsc::Sender<Result<Event>>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let mut stream = stream.eventsource();
    let idle_timeout = *OPENCLAW_STREAM_IDLE_TIMEOUT_MS;

    let mut tool_blocks: HashMap<usize, ToolUseState> = HashMap::new();
    let mut input_tokens = 0u64;
    let mut output_tokens = 0u64;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = timeout(idle_timeout, stream.next()) => next,
        };
        let sse = match next {
            Ok(Some(Ok(sse))) => sse,
            Ok(Some(Err(e))) => {
                let _ = tx_event.send(Err(GatewayErr::Stream(e.to_string()))).await;
                return;
            }
            Ok(None) => {
                let _ = tx_event
                    .send(Err(GatewayErr::Stream(
                        "stream closed before message_stop".into(),
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

        if sse.data.trim().is_empty() {
            continue;
        }
        let event: MessagesStreamEvent = match serde_json::from_str(&sse.data) {
            Ok(event) => event,
            Err(e) => {
                debug!("failed to parse Messages event: {e}, data: {}", &sse.data);
                continue;
            }
        };

        match event {
            MessagesStreamEvent::MessageStart { message } => {
                input_tokens = message.usage.input_tokens;
            }
            MessagesStreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::ToolUse { id, name },
            } => {
                tool_blocks.insert(
                    index,
                    ToolUseState {
                        id,
                        name,
                        input_json: String::new(),
                    },
                );
            }
            MessagesStreamEvent::ContentBlockStart { .. } => {}
            MessagesStreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentBlockDelta::TextDelta { text } => {
                    if tx_event.send(Ok(Event::Text { delta: text })).await.is_err() {
                        return;
                    }
                }
                ContentBlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(block) = tool_blocks.get_mut(&index) {
                        block.input_json.push_str(&partial_json);
                    }
                }
                ContentBlockDelta::ThinkingDelta { thinking } => {
                    if tx_event
                        .send(Ok(Event::Thinking { delta: thinking }))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                ContentBlockDelta::Other => {}
            },
            MessagesStreamEvent::ContentBlockStop { index } => {
                if let Some(block) = tool_blocks.remove(&index) {
                    let arguments = if block.input_json.is_empty() {
                        "{}".to_string()
                    } else {
                        block.input_json
                    };
                    if tx_event
                        .send(Ok(Event::ToolCall {
                            call_id: block.id,
                            name: block.name,
                            arguments,
                        }))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
            MessagesStreamEvent::MessageDelta { usage } => {
                output_tokens = usage.output_tokens;
            }
            MessagesStreamEvent::MessageStop => {
                let _ = tx_event
                    .send(Ok(Event::Usage(TokenUsage {
                        input_tokens,
                        output_tokens,
                    })))
                    .await;
                let _ = tx_event.send(Ok(Event::Done)).await;
                return;
            }
            MessagesStreamEvent::Error { error } => {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("upstream reported an error")
                    .to_string();
                let _ = tx_event.send(Ok(Event::Error { message })).await;
                let _ = tx_event.send(Ok(Event::Done)).await;
                return;
            }
            MessagesStreamEvent::Ping | MessagesStreamEvent::Other => {}
        }
    }
}
