//! Neutral events → Responses API wire frames.
//!
//! Clients depend on the exact event ordering here: `response.created`
//! first; per text item `output_item.added` → `content_part.added` →
//! `output_text.delta`*; per function call `output_item.added` →
//! `function_call_arguments.delta`* → `function_call_arguments.done` →
//! `output_item.done`, where the two `done` frames always carry the fully
//! reassembled arguments; finally `output_text.done` and
//! `response.completed`.

use chrono::Utc;
use openclaw_protocol::Event;
use openclaw_protocol::TokenUsage;
use serde_json::Value;
use serde_json::json;
use uuid::Uuid;

use super::TurnOutcome;

struct OpenTextItem {
    item_id: String,
    output_index: usize,
}

struct OpenCall {
    call_id: String,
    item_id: String,
    output_index: usize,
    name: String,
    arguments: String,
}

pub struct ResponsesStream {
    response_id: String,
    model: String,
    created_at: i64,
    next_output_index: usize,
    text_item: Option<OpenTextItem>,
    text: String,
    open_call: Option<OpenCall>,
    /// Finalized output items, echoed in `response.completed`.
    output: Vec<Value>,
    usage: Option<TokenUsage>,
}

impl ResponsesStream {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            response_id: format!("resp_{}", Uuid::new_v4().simple()),
            model: model.into(),
            created_at: Utc::now().timestamp(),
            next_output_index: 0,
            text_item: None,
            text: String::new(),
            open_call: None,
            output: Vec::new(),
            usage: None,
        }
    }

    /// The opening frame, written before any event is translated.
    pub fn created(&self) -> Value {
        json!({
            "type": "response.created",
            "response": {
                "id": self.response_id,
                "object": "response",
                "created_at": self.created_at,
                "status": "in_progress",
                "model": self.model,
                "output": [],
            },
        })
    }

    pub fn on_event(&mut self, event: &Event) -> Vec<Value> {
        match event {
            Event::Text { delta } => {
                let mut frames = Vec::new();
                if self.text_item.is_none() {
                    let item_id = format!("msg_{}", Uuid::new_v4().simple());
                    let output_index = self.next_output_index;
                    self.next_output_index += 1;
                    frames.push(json!({
                        "type": "response.output_item.added",
                        "output_index": output_index,
                        "item": {
                            "type": "message",
                            "id": item_id,
                            "status": "in_progress",
                            "role": "assistant",
                            "content": [],
                        },
                    }));
                    frames.push(json!({
                        "type": "response.content_part.added",
                        "item_id": item_id,
                        "output_index": output_index,
                        "content_index": 0,
                        "part": {"type": "output_text", "text": ""},
                    }));
                    self.text_item = Some(OpenTextItem {
                        item_id,
                        output_index,
                    });
                }
                let item = self
                    .text_item
                    .as_ref()
                    .map(|t| (t.item_id.clone(), t.output_index));
                if let Some((item_id, output_index)) = item {
                    self.text.push_str(delta);
                    frames.push(json!({
                        "type": "response.output_text.delta",
                        "item_id": item_id,
                        "output_index": output_index,
                        "content_index": 0,
                        "delta": delta,
                    }));
                }
                frames
            }
            Event::ToolCall {
                call_id,
                name,
                arguments,
            } => {
                let mut frames = Vec::new();
                let same_call = self
                    .open_call
                    .as_ref()
                    .is_some_and(|c| c.call_id == *call_id);
                if !same_call {
                    frames.extend(self.close_open_call());
                    let item_id = format!("fc_{}", Uuid::new_v4().simple());
                    let output_index = self.next_output_index;
                    self.next_output_index += 1;
                    frames.push(json!({
                        "type": "response.output_item.added",
                        "output_index": output_index,
                        "item": {
                            "type": "function_call",
                            "id": item_id,
                            "status": "in_progress",
                            "call_id": call_id,
                            "name": name,
                            "arguments": arguments,
                        },
                    }));
                    self.open_call = Some(OpenCall {
                        call_id: call_id.clone(),
                        item_id,
                        output_index,
                        name: name.clone(),
                        arguments: String::new(),
                    });
                }
                if let Some(call) = self.open_call.as_mut() {
                    call.arguments.push_str(arguments);
                    if !arguments.is_empty() {
                        frames.push(json!({
                            "type": "response.function_call_arguments.delta",
                            "item_id": call.item_id,
                            "output_index": call.output_index,
                            "call_id": call.call_id,
                            "delta": arguments,
                        }));
                    }
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

    /// Close the in-flight call: the `done` frames carry the full
    /// reassembled argument string, never a fragment.
    fn close_open_call(&mut self) -> Vec<Value> {
        let Some(call) = self.open_call.take() else {
            return Vec::new();
        };
        let item = json!({
            "type": "function_call",
            "id": call.item_id,
            "status": "completed",
            "call_id": call.call_id,
            "name": call.name,
            "arguments": call.arguments,
        });
        self.output.push(item.clone());
        vec![
            json!({
                "type": "response.function_call_arguments.done",
                "item_id": call.item_id,
                "output_index": call.output_index,
                "call_id": call.call_id,
                "arguments": call.arguments,
            }),
            json!({
                "type": "response.output_item.done",
                "output_index": call.output_index,
                "item": item,
            }),
        ]
    }

    /// Frames for stream completion: close whatever is open, then
    /// `response.completed` with usage attached.
    pub fn finish(&mut self) -> Vec<Value> {
        let mut frames = self.close_open_call();
        if let Some(text_item) = self.text_item.take() {
            frames.push(json!({
                "type": "response.output_text.done",
                "item_id": text_item.item_id,
                "output_index": text_item.output_index,
                "content_index": 0,
                "text": self.text,
            }));
            self.output.insert(
                0,
                json!({
                    "type": "message",
                    "id": text_item.item_id,
                    "status": "completed",
                    "role": "assistant",
                    "content": [{"type": "output_text", "text": self.text}],
                }),
            );
        }
        let mut response = json!({
            "id": self.response_id,
            "object": "response",
            "created_at": self.created_at,
            "status": "completed",
            "model": self.model,
            "output": self.output,
        });
        if let Some(usage) = &self.usage {
            response["usage"] = usage_json(usage);
        }
        frames.push(json!({
            "type": "response.completed",
            "response": response,
        }));
        frames
    }
}

fn usage_json(usage: &TokenUsage) -> Value {
    json!({
        "input_tokens": usage.input_tokens,
        "output_tokens": usage.output_tokens,
        "total_tokens": usage.total(),
    })
}

/// Build the single-document response for the non-streaming path.
pub fn aggregate_responses_response(model: &str, outcome: &TurnOutcome) -> Value {
    let mut output = Vec::new();
    if !outcome.text.is_empty() {
        output.push(json!({
            "type": "message",
            "id": format!("msg_{}", Uuid::new_v4().simple()),
            "status": "completed",
            "role": "assistant",
            "content": [{"type": "output_text", "text": outcome.text}],
        }));
    }
    for call in &outcome.calls {
        output.push(json!({
            "type": "function_call",
            "id": format!("fc_{}", Uuid::new_v4().simple()),
            "status": "completed",
            "call_id": call.call_id,
            "name": call.name,
            "arguments": call.arguments,
        }));
    }
    let mut response = json!({
        "id": format!("resp_{}", Uuid::new_v4().simple()),
        "object": "response",
        "created_at": Utc::now().timestamp(),
        "status": "completed",
        "model": model,
        "output": output,
    });
    if let Some(usage) = &outcome.usage {
        response["usage"] = usage_json(usage);
    }
    response
}
