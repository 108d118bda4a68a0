//! Responses API request → neutral [`Turn`].

use openclaw_protocol::Role;
use openclaw_protocol::Turn;
use openclaw_protocol::TurnMessage;
use openclaw_protocol::wire::InputItem;
use openclaw_protocol::wire::ResponsesRequest;
use tracing::debug;

use super::apply_tool_choice;
use super::merge_instructions;
use super::reconcile_tool_outputs;
use super::resolve_instructions;
use super::tool_spec;
use crate::error::Result;
use crate::session::SessionCache;

/// Substrings that mark a tool output as a schema-validation failure. Paired
/// with an empty-arguments `exec` call, the exchange taught the model
/// nothing and replaying it re-teaches the mistake, so both halves are
/// dropped. Deliberately `exec`-only.
const VALIDATION_FAILURE_MARKERS: &[&str] =
    &["failed to validate", "invalid function call arguments"];

fn is_validation_failure(output: &str) -> bool {
    let lowered = output.to_lowercase();
    VALIDATION_FAILURE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

fn is_empty_args(arguments: &str) -> bool {
    let trimmed = arguments.trim();
    trimmed.is_empty() || trimmed == "{}"
}

/// Remove failed-empty-exec pairs: a `function_call` for `exec` with
/// empty-object arguments plus its validation-failure output.
fn drop_failed_empty_exec_pairs(items: &mut Vec<InputItem>) {
    let mut dropped: Vec<usize> = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let InputItem::FunctionCall {
            call_id,
            name,
            arguments,
        } = item
        else {
            continue;
        };
        if name != "exec" || !is_empty_args(arguments) {
            continue;
        }
        let paired = items.iter().enumerate().skip(i + 1).find_map(|(j, later)| {
            match later {
                InputItem::FunctionCallOutput {
                    call_id: out_id,
                    output,
                } if out_id == call_id => Some((j, output.to_text())),
                _ => None,
            }
        });
        if let Some((j, output)) = paired
            && is_validation_failure(&output)
        {
            debug!(call_id = call_id.as_str(), "dropping failed empty exec pair");
            dropped.push(i);
            dropped.push(j);
        }
    }
    if !dropped.is_empty() {
        let mut index = 0;
        items.retain(|_| {
            let keep = !dropped.contains(&index);
            index += 1;
            keep
        });
    }
}

pub fn responses_request_to_turn(
    req: &ResponsesRequest,
    model: String,
    sessions: &SessionCache,
    session_key: &str,
) -> Result<Turn> {
    let mut items = req.input.clone().map(|i| i.into_items()).unwrap_or_default();
    drop_failed_empty_exec_pairs(&mut items);

    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<TurnMessage> = Vec::new();
    for item in items {
        match item {
            InputItem::Message { role, content } => match role.as_str() {
                "system" | "developer" => {
                    let text = content.to_text();
                    if !text.is_empty() {
                        system_parts.push(text);
                    }
                }
                "assistant" => {
                    messages.push(TurnMessage::text(Role::Assistant, content.to_text()));
                }
                _ => messages.push(TurnMessage::text(Role::User, content.to_text())),
            },
            InputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                messages.push(TurnMessage::tool_call(call_id, name, arguments));
            }
            InputItem::FunctionCallOutput { call_id, output } => {
                messages.push(TurnMessage::tool_output(call_id, output.to_text()));
            }
            InputItem::Other => {
                debug!("skipping unsupported input item");
            }
        }
    }

    reconcile_tool_outputs(&mut messages, sessions, session_key);

    let merged = merge_instructions(
        req.instructions.as_deref().unwrap_or(""),
        &system_parts.join("\n"),
    );
    let instructions = resolve_instructions(merged, sessions, session_key);

    let mut tools: Vec<_> = req
        .tools
        .iter()
        .filter(|t| t.kind.as_deref().unwrap_or("function") == "function")
        .map(|t| tool_spec(t.name.clone(), t.description.clone(), t.parameters.clone()))
        .collect();
    let tool_choice = apply_tool_choice(req.tool_choice.as_ref(), &mut tools);

    Ok(Turn {
        model,
        instructions,
        messages,
        tools,
        tool_choice,
        reasoning_effort: req.reasoning.as_ref().and_then(|r| r.effort.clone()),
        verbosity: req.text.as_ref().and_then(|t| t.verbosity.clone()),
        session_key: Some(session_key.to_string()),
    })
}
