use serde::Deserialize;
use serde::Serialize;

/// Message roles understood by every harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry in a [`Turn`]'s message sequence.
///
/// Tool traffic is folded into the same shape: an assistant-side tool call
/// carries the call id in `tool_id`, the tool name in `name` and the raw
/// arguments JSON in `content`; a tool result carries the call id in
/// `tool_id` and the output text in `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl TurnMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_id: None,
            name: None,
        }
    }

    pub fn tool_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: arguments.into(),
            tool_id: Some(call_id.into()),
            name: Some(name.into()),
        }
    }

    pub fn tool_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: output.into(),
            tool_id: Some(call_id.into()),
            name: None,
        }
    }

    /// True for assistant-side tool-call entries.
    pub fn is_tool_call(&self) -> bool {
        self.role == Role::Assistant && self.tool_id.is_some()
    }
}

/// A function tool offered to the model for one turn. `parameters` is the
/// JSON Schema after strict-mode normalization; `strict` is false when the
/// client-supplied schema could not be normalized and was passed through
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub strict: bool,
}

/// The provider-agnostic form of one model request, produced by the request
/// translators and consumed by every harness.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Turn {
    /// Provider-visible model id, post alias expansion.
    pub model: String,
    /// Merged system prompt (top-level instructions + system messages).
    pub instructions: String,
    pub messages: Vec<TurnMessage>,
    pub tools: Vec<ToolSpec>,
    /// `"auto"`, `"required"`, ... — already rewritten from object form.
    pub tool_choice: Option<String>,
    /// Opaque to the router; harnesses forward these when the provider has a
    /// matching knob.
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
    /// Session identity, used as a prompt-cache hint by harnesses that
    /// support one.
    pub session_key: Option<String>,
}
