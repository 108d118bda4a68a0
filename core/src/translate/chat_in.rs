//! Chat Completions request → neutral [`Turn`].

use openclaw_protocol::Role;
use openclaw_protocol::Turn;
use openclaw_protocol::TurnMessage;
use openclaw_protocol::wire::ChatCompletionsRequest;

use super::apply_tool_choice;
use super::merge_instructions;
use super::reconcile_tool_outputs;
use super::resolve_instructions;
use super::tool_spec;
use crate::error::GatewayErr;
use crate::error::Result;
use crate::session::SessionCache;

/// Translate a Chat Completions request. `model` is the post-expansion model
/// id chosen by the router.
pub fn chat_request_to_turn(
    req: &ChatCompletionsRequest,
    model: String,
    sessions: &SessionCache,
    session_key: &str,
) -> Result<Turn> {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<TurnMessage> = Vec::new();

    for message in &req.messages {
        let text = message.content.as_ref().map(|c| c.to_text());
        match message.role.as_str() {
            "system" | "developer" => {
                if let Some(text) = text
                    && !text.is_empty()
                {
                    system_parts.push(text);
                }
            }
            "tool" => {
                let call_id = message.tool_call_id.clone().ok_or_else(|| {
                    GatewayErr::Malformed("tool message missing tool_call_id".into())
                })?;
                messages.push(TurnMessage::tool_output(call_id, text.unwrap_or_default()));
            }
            "assistant" => {
                if let Some(text) = text
                    && !text.is_empty()
                {
                    messages.push(TurnMessage::text(Role::Assistant, text));
                }
                for call in &message.tool_calls {
                    messages.push(TurnMessage::tool_call(
                        call.id.clone(),
                        call.function.name.clone(),
                        call.function.arguments.clone(),
                    ));
                }
            }
            _ => {
                messages.push(TurnMessage::text(Role::User, text.unwrap_or_default()));
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
        .filter(|t| t.kind == "function")
        .map(|t| {
            tool_spec(
                t.function.name.clone(),
                t.function.description.clone(),
                t.function.parameters.clone(),
            )
        })
        .collect();
    let tool_choice = apply_tool_choice(req.tool_choice.as_ref(), &mut tools);

    Ok(Turn {
        model,
        instructions,
        messages,
        tools,
        tool_choice,
        reasoning_effort: req.reasoning_effort.clone(),
        verbosity: None,
        session_key: Some(session_key.to_string()),
    })
}
