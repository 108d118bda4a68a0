//! The per-backend adapter contract.
//!
//! A harness owns everything provider-specific: auth, retry, credential
//! refresh, and the mapping between provider-native stream events and the
//! neutral [`Event`](openclaw_protocol::Event) union. The engine only ever
//! sees this capability set.

mod anthropic;
mod codex;
mod openai;

use std::borrow::Cow;

use async_trait::async_trait;
use openclaw_protocol::Turn;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub use anthropic::AnthropicHarness;
pub use codex::CodexHarness;
pub use openai::OpenAiCompatHarness;

use crate::error::GatewayErr;
use crate::error::Result;
use crate::sse::EventStream;

/// One entry in the aggregated `/v1/models` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub owned_by: String,
}

#[async_trait]
pub trait Harness: Send + Sync {
    /// Stable registry name, e.g. `"codex"`.
    fn name(&self) -> &str;

    /// Whether this harness wants to serve the given model id.
    fn matches_model(&self, model: &str) -> bool;

    /// Expand a short alias to the provider-visible model id; returns the
    /// input unchanged when no alias applies.
    fn expand_alias<'a>(&self, model: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(model)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Drive one turn against the upstream, emitting neutral events in
    /// arrival order. The stream ends with `Event::Done` (after a `Usage`
    /// event when the provider reported one) or with an error item.
    async fn stream_turn(&self, turn: &Turn, cancel: CancellationToken) -> Result<EventStream>;
}

/// Sleep between retry attempts, waking early on cancellation.
pub(crate) async fn cancellable_sleep(
    delay: std::time::Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(GatewayErr::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// `Retry-After` header seconds, when the upstream sent one.
pub(crate) fn retry_after(res: &reqwest::Response) -> Option<std::time::Duration> {
    res.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(std::time::Duration::from_secs)
}
