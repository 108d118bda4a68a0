//! Shared wire and engine types for the OpenClaw gateway.
//!
//! Everything in this crate is plain serde data: the provider-neutral
//! [`Turn`]/[`Event`] model consumed by harnesses, and the client-facing
//! request shapes for the two supported dialects (Chat Completions and the
//! Responses API).

mod event;
mod turn;
pub mod wire;

pub use event::Event;
pub use event::TokenUsage;
pub use turn::Role;
pub use turn::ToolSpec;
pub use turn::Turn;
pub use turn::TurnMessage;
