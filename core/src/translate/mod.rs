//! Translation between the client wire dialects and the neutral turn/event
//! model.

mod chat_in;
mod chat_out;
mod responses_in;
mod responses_out;

use std::collections::HashSet;

use openclaw_protocol::Event;
use openclaw_protocol::Role;
use openclaw_protocol::TokenUsage;
use openclaw_protocol::ToolSpec;
use openclaw_protocol::TurnMessage;
use serde_json::Value;
use tracing::warn;

pub use chat_in::chat_request_to_turn;
pub use chat_out::ChatStream;
pub use chat_out::aggregate_chat_response;
pub use responses_in::responses_request_to_turn;
pub use responses_out::ResponsesStream;
pub use responses_out::aggregate_responses_response;

use crate::schema::normalize_strict;
use crate::session::SessionCache;
use crate::session::ToolCallRecord;

/// Merge top-level instructions with the concatenated system messages.
pub(crate) fn merge_instructions(base: &str, system: &str) -> String {
    let base = base.trim();
    let system = system.trim();
    match (base.is_empty(), system.is_empty()) {
        (true, true) => String::new(),
        (true, false) => system.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{base}\n\n{system}"),
    }
}

/// Empty merged instructions fall back to whatever this session last used;
/// non-empty instructions refresh the cache.
pub(crate) fn resolve_instructions(
    merged: String,
    sessions: &SessionCache,
    session_key: &str,
) -> String {
    if merged.is_empty() {
        sessions.instructions(session_key).unwrap_or_default()
    } else {
        sessions.save_instructions(session_key, &merged);
        merged
    }
}

/// Build a [`ToolSpec`] with its parameter schema normalized for strict
/// mode. Schemas that cannot be normalized are passed through untouched with
/// strict disabled.
pub(crate) fn tool_spec(
    name: String,
    description: Option<String>,
    parameters: Option<Value>,
) -> ToolSpec {
    let parameters = parameters.unwrap_or(Value::Null);
    match normalize_strict(&parameters) {
        Some(normalized) => ToolSpec {
            name,
            description: description.unwrap_or_default(),
            parameters: normalized,
            strict: true,
        },
        None => {
            warn!(tool = name.as_str(), "tool schema failed to parse; strict disabled");
            ToolSpec {
                name,
                description: description.unwrap_or_default(),
                parameters,
                strict: false,
            }
        }
    }
}

/// Rewrite a wire `tool_choice` to its string form. The object forms
/// (`{"function":{"name":..}}` / `{"name":..}`) become `"auto"` with the
/// tool list filtered down to the named tool.
pub(crate) fn apply_tool_choice(
    choice: Option<&Value>,
    tools: &mut Vec<ToolSpec>,
) -> Option<String> {
    match choice? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => {
            let name = map
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .or_else(|| map.get("name").and_then(Value::as_str))?
                .to_string();
            tools.retain(|t| t.name == name);
            Some("auto".to_string())
        }
        _ => None,
    }
}

/// Enforce the orphan rule over an assembled message sequence: every tool
/// output must follow a tool call with the same id in this request, or be
/// recoverable from the session cache (the missing call is synthesized in
/// front of it). Unrecoverable orphans are dropped, not errors — clients
/// routinely replay aborted turns.
pub(crate) fn reconcile_tool_outputs(
    messages: &mut Vec<TurnMessage>,
    sessions: &SessionCache,
    session_key: &str,
) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<TurnMessage> = Vec::with_capacity(messages.len());
    for message in messages.drain(..) {
        match message.role {
            Role::Assistant if message.is_tool_call() => {
                if let Some(id) = &message.tool_id {
                    seen.insert(id.clone());
                }
                out.push(message);
            }
            Role::Tool => {
                let call_id = message.tool_id.clone().unwrap_or_default();
                if seen.contains(&call_id) {
                    out.push(message);
                } else if let Some(record) = sessions.get_tool_call(session_key, &call_id) {
                    seen.insert(call_id.clone());
                    out.push(TurnMessage::tool_call(
                        call_id,
                        record.name,
                        record.arguments,
                    ));
                    out.push(message);
                } else {
                    warn!(
                        call_id = call_id.as_str(),
                        "dropping orphaned tool output with no matching call"
                    );
                }
            }
            _ => out.push(message),
        }
    }
    *messages = out;
}

/// One fully-assembled tool call observed on the neutral stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedCall {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

/// Running aggregate of one turn's neutral events; used for non-streaming
/// responses, usage recording, and caching emitted calls.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    pub text: String,
    pub calls: Vec<EmittedCall>,
    pub usage: Option<TokenUsage>,
    pub error: Option<String>,
}

impl TurnOutcome {
    pub fn absorb(&mut self, event: &Event) {
        match event {
            Event::Text { delta } => self.text.push_str(delta),
            Event::ToolCall {
                call_id,
                name,
                arguments,
            } => {
                match self.calls.iter_mut().find(|c| c.call_id == *call_id) {
                    Some(call) => call.arguments.push_str(arguments),
                    None => self.calls.push(EmittedCall {
                        call_id: call_id.clone(),
                        name: name.clone(),
                        arguments: arguments.clone(),
                    }),
                }
            }
            Event::Usage(usage) => self.usage = Some(*usage),
            Event::Error { message } => self.error = Some(message.clone()),
            Event::Thinking { .. } | Event::PlanUpdate { .. } | Event::Done => {}
        }
    }

    pub fn finish_reason(&self) -> &'static str {
        if self.calls.is_empty() { "stop" } else { "tool_calls" }
    }

    /// Session-cache records for every call this turn emitted.
    pub fn tool_call_records(&self) -> Vec<(String, ToolCallRecord)> {
        self.calls
            .iter()
            .map(|c| {
                (
                    c.call_id.clone(),
                    ToolCallRecord {
                        name: c.name.clone(),
                        arguments: c.arguments.clone(),
                    },
                )
            })
            .collect()
    }
}
