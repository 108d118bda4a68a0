use std::time::Duration;

use env_flags::env_flags;

env_flags! {
    /// Upstream request retry budget shared by all harnesses.
    pub OPENCLAW_REQUEST_MAX_RETRIES: u64 = 4;

    /// If an upstream SSE stream stays completely silent for this long it is
    /// treated as disconnected.
    pub OPENCLAW_STREAM_IDLE_TIMEOUT_MS: Duration = Duration::from_millis(300_000), |value| {
        value.parse().map(Duration::from_millis)
    };

    /// Deadline for driving one non-streaming turn to completion.
    pub OPENCLAW_REQUEST_TIMEOUT_MS: Duration = Duration::from_millis(90_000), |value| {
        value.parse().map(Duration::from_millis)
    };

    /// Session cache entry lifetime.
    pub OPENCLAW_SESSION_TTL_SECS: u64 = 21_600;

    /// Sent as the `originator` header on ChatGPT-backed requests.
    pub OPENCLAW_ORIGINATOR: &str = "openclaw_gateway";

    pub CHATGPT_API_BASE: &str = "https://chatgpt.com/backend-api/codex";
    pub CHATGPT_ACCESS_TOKEN: Option<&str> = None;
    pub CHATGPT_ACCOUNT_ID: Option<&str> = None;

    pub ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
    pub ANTHROPIC_OAUTH_TOKEN: Option<&str> = None;
    pub ANTHROPIC_VERSION: &str = "2023-06-01";
    pub ANTHROPIC_MAX_TOKENS: u64 = 8192;
}
