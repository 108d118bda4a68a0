use serde::Deserialize;
use serde::Serialize;

/// Token counts reported by an upstream for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Neutral stream event emitted by a harness while driving one [`crate::Turn`].
///
/// `ToolCall` arguments may arrive as one whole string or as several partial
/// fragments for the same `call_id`; consumers concatenate fragments in
/// arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Text {
        delta: String,
    },
    ToolCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    Usage(TokenUsage),
    /// Opaque reasoning output; ignored by the client-dialect translators.
    Thinking {
        delta: String,
    },
    /// Opaque plan/progress payload; ignored by the client-dialect
    /// translators.
    PlanUpdate {
        payload: serde_json::Value,
    },
    Error {
        message: String,
    },
    Done,
}
