//! Neutral events → Chat Completions wire frames.

use std::collections::HashMap;

use chrono::Utc;
use openclaw_protocol::Event;
use openclaw_protocol::TokenUsage;
use serde_json::Value;
use serde_json::json;
use uuid::Uuid;

use super::TurnOutcome;

/// Streaming translator for the Chat Completions dialect. Each neutral event
/// maps to zero or more `chat.completion.chunk` payloads; the caller writes
/// each as one SSE frame and terminates with `data: [DONE]`.
pub struct ChatStream {
    id: String,
    model: String,
    created: i64,
    sent_role: bool,
    /// call_id → tool_calls array index, in order of first appearance.
    call_indices: HashMap<String, usize>,
    usage: Option<TokenUsage>,
}

impl ChatStream {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            model: model.into(),
            created: Utc::now().timestamp(),
            sent_role: false,
            call_indices: HashMap::new(),
            usage: None,
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        })
    }

    /// The first content-bearing delta also announces the assistant role.
    fn with_role(&mut self, mut delta: Value) -> Value {
        if !self.sent_role {
            self.sent_role = true;
            delta["role"] = json!("assistant");
        }
        delta
    }

    pub fn on_event(&mut self, event: &Event) -> Vec<Value> {
        match event {
            Event::Text { delta } => {
                let delta = self.with_role(json!({"content": delta}));
                vec![self.chunk(delta, None)]
            }
            Event::ToolCall {
                call_id,
                name,
                arguments,
            } => {
                let mut frames = Vec::new();
                let next_index = self.call_indices.len();
                let index = match self.call_indices.get(call_id) {
                    Some(index) => *index,
                    None => {
                        self.call_indices.insert(call_id.clone(), next_index);
                        let opening = self.with_role(json!({
                            "tool_calls": [{
                                "index": next_index,
                                "id": call_id,
                                "type": "function",
                                "function": {"name": name, "arguments": ""},
                            }]
                        }));
                        frames.push(self.chunk(opening, None));
                        next_index
                    }
                };
                if !arguments.is_empty() {
                    let delta = json!({
                        "tool_calls": [{
                            "index": index,
                            "function": {"arguments": arguments},
                        }]
                    });
                    frames.push(self.chunk(delta, None));
                }
                frames
            }
            Event::Usage(usage) => {
                self.usage = Some(*usage);
                Vec::new()
            }
            Event::Thinking { .. } | Event::PlanUpdate { .. } => Vec::new(),
            Event::Error { .. } | Event::Done => Vec::new(),
        }
    }

    /// The terminal chunk: empty delta, `finish_reason` set, usage attached
    /// when the upstream reported it.
    pub fn finish(&mut self) -> Vec<Value> {
        let finish_reason = if self.call_indices.is_empty() {
            "stop"
        } else {
            "tool_calls"
        };
        let mut chunk = self.chunk(json!({}), Some(finish_reason));
        if let Some(usage) = &self.usage {
            chunk["usage"] = usage_json(usage);
        }
        vec![chunk]
    }
}

fn usage_json(usage: &TokenUsage) -> Value {
    json!({
        "prompt_tokens": usage.input_tokens,
        "completion_tokens": usage.output_tokens,
        "total_tokens": usage.total(),
    })
}

/// Build the single-document response for the non-streaming path.
pub fn aggregate_chat_response(model: &str, outcome: &TurnOutcome) -> Value {
    let content = if outcome.text.is_empty() {
        Value::Null
    } else {
        Value::String(outcome.text.clone())
    };
    let mut message = json!({
        "role": "assistant",
        "content": content,
    });
    if !outcome.calls.is_empty() {
        message["tool_calls"] = Value::Array(
            outcome
                .calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.call_id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments,
                        },
                    })
                })
                .collect(),
        );
    }
    let mut response = json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4().simple()),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": outcome.finish_reason(),
        }],
    });
    if let Some(usage) = &outcome.usage {
        response["usage"] = usage_json(usage);
    }
    response
}
