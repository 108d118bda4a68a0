//! Upstream SSE plumbing shared by the harnesses.
//!
//! Frame-level parsing (grouping `data:` lines, skipping `:` comments) is
//! delegated to `eventsource-stream` over the reqwest byte stream. This
//! module supplies the generic decoded event shape and the channel-backed
//! neutral stream handed to the handler.

use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use openclaw_protocol::Event;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

/// One upstream stream event, decoded from a single SSE frame.
///
/// This carries the superset of fields any provider uses; absent fields are
/// `None` so one struct can serve every event kind. Frames that fail to
/// decode are skipped by the caller (non-fatal per frame).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SseEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub item: Option<Value>,
    pub response: Option<Value>,
    pub delta: Option<String>,
    pub item_id: Option<String>,
    pub call_id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
    pub part: Option<Value>,
    pub text: Option<String>,
    pub error: Option<Value>,
}

impl SseEvent {
    /// Decode one frame payload. `[DONE]` and empty payloads are no-ops and
    /// return `None`.
    pub fn decode(data: &str) -> Option<std::result::Result<Self, serde_json::Error>> {
        let trimmed = data.trim();
        if trimmed.is_empty() || trimmed == "[DONE]" {
            return None;
        }
        Some(serde_json::from_str(trimmed))
    }
}

/// Serialize one event payload as a wire frame: `data: <compact-json>\n\n`.
pub fn frame(payload: &Value) -> String {
    format!("data: {payload}\n\n")
}

/// The literal terminator frame.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Neutral event stream produced by a harness. The sending half lives in a
/// spawned task that owns the upstream response body, which keeps delivery
/// in-order and single-consumer.
#[derive(Debug)]
pub struct EventStream {
    rx_event: mpsc::Receiver<Result<Event>>,
}

impl EventStream {
    pub fn channel(buffer: usize) -> (mpsc::Sender<Result<Event>>, Self) {
        let (tx_event, rx_event) = mpsc::channel(buffer);
        (tx_event, Self { rx_event })
    }
}

impl Stream for EventStream {
    type Item = Result<Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx_event.poll_recv(cx)
    }
}
