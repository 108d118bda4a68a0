//! SSE response plumbing.
//!
//! The response body is fed from a channel: every frame written becomes one
//! body chunk, which the server flushes immediately, preserving real-time
//! delivery. Once the response head is committed, later failures travel
//! in-band as an `error` frame followed by `[DONE]`.

use axum::body::Body;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::Response;
use bytes::Bytes;
use openclaw_core::DONE_FRAME;
use openclaw_core::frame;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub struct SseWriter {
    tx: mpsc::Sender<std::result::Result<Bytes, std::convert::Infallible>>,
}

impl SseWriter {
    /// Write one `data:` frame. Returns false when the client went away.
    pub async fn json(&self, payload: &Value) -> bool {
        self.raw(frame(payload)).await
    }

    pub async fn done(&self) -> bool {
        self.raw(DONE_FRAME.to_string()).await
    }

    async fn raw(&self, text: String) -> bool {
        self.tx.send(Ok(Bytes::from(text))).await.is_ok()
    }
}

/// Build the streaming response and its writer half.
pub fn sse_response() -> (SseWriter, Response) {
    let (tx, rx) = mpsc::channel(32);
    let body = Body::from_stream(ReceiverStream::new(rx));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (SseWriter { tx }, response)
}
