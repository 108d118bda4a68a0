//! Engine of the OpenClaw gateway: protocol translation, streaming
//! reassembly, session memory, admission stores, and the per-provider
//! harnesses.
//!
//! The HTTP surface lives in `openclaw-gateway`; everything here is
//! transport-agnostic and exercised directly by unit tests.

mod auth;
mod collector;
pub mod error;
mod flags;
mod harness;
mod keys;
mod logs;
mod ratelimit;
mod router;
mod schema;
mod session;
mod sse;
mod translate;
mod usage;
mod util;

pub use auth::CredentialSource;
pub use auth::StaticToken;
pub use collector::Collector;
pub use error::GatewayErr;
pub use error::Result;
pub use flags::ANTHROPIC_API_BASE;
pub use flags::ANTHROPIC_OAUTH_TOKEN;
pub use flags::CHATGPT_ACCESS_TOKEN;
pub use flags::CHATGPT_ACCOUNT_ID;
pub use flags::CHATGPT_API_BASE;
pub use flags::OPENCLAW_REQUEST_TIMEOUT_MS;
pub use flags::OPENCLAW_SESSION_TTL_SECS;
pub use harness::AnthropicHarness;
pub use harness::CodexHarness;
pub use harness::Harness;
pub use harness::ModelInfo;
pub use harness::OpenAiCompatHarness;
pub use keys::KeyRecord;
pub use keys::KeyStore;
pub use logs::AuditEntry;
pub use logs::AuditLog;
pub use logs::RotatingLog;
pub use logs::TraceLog;
pub use logs::TraceRecord;
pub use ratelimit::RateLimiter;
pub use router::ModelRouter;
pub use schema::normalize_strict;
pub use session::SessionCache;
pub use session::ToolCallRecord;
pub use session::sha256_hex;
pub use sse::DONE_FRAME;
pub use sse::EventStream;
pub use sse::SseEvent;
pub use sse::frame;
pub use translate::ChatStream;
pub use translate::EmittedCall;
pub use translate::ResponsesStream;
pub use translate::TurnOutcome;
pub use translate::aggregate_chat_response;
pub use translate::aggregate_responses_response;
pub use translate::chat_request_to_turn;
pub use translate::responses_request_to_turn;
pub use usage::USAGE_RESET_PATH;
pub use usage::UsageEvent;
pub use usage::UsageStore;
