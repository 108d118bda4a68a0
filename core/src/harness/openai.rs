//! Harness for arbitrary OpenAI-compatible services (`/chat/completions` +
//! `/models`).

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::collections::HashMap;

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
use crate::error::GatewayErr;
use crate::error::Result;
use crate::flags::OPENCLAW_REQUEST_MAX_RETRIES;
use crate::flags::OPENCLAW_STREAM_IDLE_TIMEOUT_MS;
use crate::sse::EventStream;
use crate::util::excerpt;
use crate::util::retry_delay;

pub struct OpenAiCompatHarness {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    match_prefixes: Vec<String>,
    aliases: HashMap<String, String>,
}

impl OpenAiCompatHarness {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        match_prefixes: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            match_prefixes: match_prefixes
                .into_iter()
                .map(|p| p.to_lowercase())
                .collect(),
            aliases: HashMap::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: HashMap<String, String>) -> Self {
        self.aliases = aliases
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        self
    }

    fn build_messages(turn: &Turn) -> Vec<Value> {
        let mut messages = Vec::with_capacity(turn.messages.len() + 1);
        if !turn.instructions.is_empty() {
            messages.push(json!({"role": "system", "content": turn.instructions}));
        }
        for message in &turn.messages {
            match message.role {
                Role::Assistant if message.is_tool_call() => {
                    messages.push(json!({
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": message.tool_id,
                            "type": "function",
                            "function": {
                                "name": message.name,
                                "arguments": message.content,
                            }
                        }]
                    }));
                }
                Role::Tool => {
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": message.tool_id,
                        "content": message.content,
                    }));
                }
                Role::System => {
                    messages.push(json!({"role": "system", "content": message.content}));
                }
                Role::User => {
                    messages.push(json!({"role": "user", "content": message.content}));
                }
                Role::Assistant => {
                    messages.push(json!({"role": "assistant", "content": message.content}));
                }
            }
        }
        messages
    }

    fn build_tools(turn: &Turn) -> Vec<Value> {
        turn.tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "strict": tool.strict,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect()
    }
}

#[async_trait]
impl Harness for OpenAiCompatHarness {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches_model(&self, model: &str) -> bool {
        let lowered = model.to_lowercase();
        self.match_prefixes
            .iter()
            .any(|p| lowered == *p || lowered.starts_with(p.as_str()))
    }

    fn expand_alias<'a>(&self, model: &'a str) -> Cow<'a, str> {
        match self.aliases.get(&model.to_lowercase()) {
            Some(expansion) => Cow::Owned(expansion.clone()),
            None => Cow::Borrowed(model),
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let mut req = self.client.get(&url);
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Ok(Vec::new());
        }
        let val = resp.json::<Value>().await?;
        let models = val
            .get("data")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.get("id").and_then(Value::as_str))
                    .map(|id| ModelInfo {
                        id: id.to_string(),
                        owned_by: self.name.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(models)
    }

    async fn stream_turn(&self, turn: &Turn, cancel: CancellationToken) -> Result<EventStream> {
        let mut payload = json!({
            "model": turn.model,
            "messages": Self::build_messages(turn),
            "stream": true,
            // Many OpenAI-compatible services only report usage on streams
            // when asked.
            "stream_options": {"include_usage": true},
        });
        let tools = Self::build_tools(turn);
        if !tools.is_empty() {
            payload["tools"] = Value::Array(tools);
            if let Some(choice) = turn.tool_choice.as_deref() {
                payload["tool_choice"] = Value::String(choice.to_string());
            }
        }

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        trace!("POST {url}: {}", payload);

        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut req = self.client.post(&url);
            if let Some(api_key) = &self.api_key {
                req = req.bearer_auth(api_key);
            }
            let req = req
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .json(&payload);

            let res = tokio::select! {
                _ = cancel.cancelled() => return Err(GatewayErr::Cancelled),
                res = req.send() => res,
            };
            match res {
                Ok(resp) if resp.status().is_success() => {
                    let (tx_event, stream) = EventStream::channel(16);
                    let bytes = resp.bytes_stream().map_err(GatewayErr::Reqwest);
                    tokio::spawn(process_chat_sse(bytes, tx_event, cancel));
                    return Ok(stream);
                }
                Ok(res) => {
                    let status = res.status();
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

/// State accumulated for one streamed tool call while the upstream splits
/// its `arguments` across delta chunks.
#[derive(Default, Debug)]
struct FunctionCallState {
    call_id: Option<String>,
    name: Option<String>,
    arguments: String,
}

async fn process_chat_sse<S>(
    stream: S,
    tx_event: mpsc::Sender<Result<Event>>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let mut stream = stream.eventsource();
    let idle_timeout = *OPENCLAW_STREAM_IDLE_TIMEOUT_MS;

    // Keyed by tool-call index so parallel calls reassemble independently.
    let mut fn_calls: BTreeMap<u64, FunctionCallState> = BTreeMap::new();
    let mut calls_emitted = false;
    let mut usage: Option<TokenUsage> = None;

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
                // Some services close without a [DONE] marker; treat a clean
                // close as completion.
                if let Some(usage) = usage {
                    let _ = tx_event.send(Ok(Event::Usage(usage))).await;
                }
                let _ = tx_event.send(Ok(Event::Done)).await;
                return;
            }
            Err(_) => {
                let _ = tx_event
                    .send(Err(GatewayErr::Stream("idle timeout waiting for SSE".into())))
                    .await;
                return;
            }
        };

        if sse.data.trim() == "[DONE]" {
            if let Some(usage) = usage {
                let _ = tx_event.send(Ok(Event::Usage(usage))).await;
            }
            let _ = tx_event.send(Ok(Event::Done)).await;
            return;
        }

        let chunk: Value = match serde_json::from_str(&sse.data) {
            Ok(v) => v,
            Err(_) => continue,
        };
        trace!("chat completions chunk: {chunk}");

        if let Some(chunk_usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            usage = Some(TokenUsage {
                input_tokens: chunk_usage
                    .get("prompt_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                output_tokens: chunk_usage
                    .get("completion_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            });
        }

        let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) else {
            continue;
        };

        if let Some(content) = choice
            .pointer("/delta/content")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
        {
            if tx_event
                .send(Ok(Event::Text {
                    delta: content.to_string(),
                }))
                .await
                .is_err()
            {
                return;
            }
        }

        if let Some(tool_calls) = choice.pointer("/delta/tool_calls").and_then(Value::as_array) {
            for tool_call in tool_calls {
                let index = tool_call.get("index").and_then(Value::as_u64).unwrap_or(0);
                let state = fn_calls.entry(index).or_default();
                if let Some(id) = tool_call.get("id").and_then(Value::as_str) {
                    state.call_id.get_or_insert_with(|| id.to_string());
                }
                if let Some(function) = tool_call.get("function") {
                    if let Some(name) = function.get("name").and_then(Value::as_str) {
                        state.name.get_or_insert_with(|| name.to_string());
                    }
                    if let Some(fragment) = function.get("arguments").and_then(Value::as_str) {
                        state.arguments.push_str(fragment);
                    }
                }
            }
        }

        if let Some(finish_reason) = choice.get("finish_reason").and_then(Value::as_str) {
            debug!(finish_reason, "chat stream finished");
            if !calls_emitted {
                calls_emitted = true;
                for (_, state) in std::mem::take(&mut fn_calls) {
                    let call = Event::ToolCall {
                        call_id: state.call_id.unwrap_or_default(),
                        name: state.name.unwrap_or_default(),
                        arguments: state.arguments,
                    };
                    if tx_event.send(Ok(call)).await.is_err() {
                        return;
                    }
                }
            }
            // Keep reading: the usage-bearing chunk and [DONE] follow.
        }
    }
}
