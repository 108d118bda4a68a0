//! HTTP handlers: admission, translation, streaming orchestration, error
//! mapping.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use chrono::Utc;
use futures::StreamExt;
use openclaw_core::AuditEntry;
use openclaw_core::ChatStream;
use openclaw_core::EventStream;
use openclaw_core::GatewayErr;
use openclaw_core::Harness;
use openclaw_core::KeyRecord;
use openclaw_core::OPENCLAW_REQUEST_TIMEOUT_MS;
use openclaw_core::ResponsesStream;
use openclaw_core::TraceRecord;
use openclaw_core::TurnOutcome;
use openclaw_core::UsageEvent;
use openclaw_core::aggregate_chat_response;
use openclaw_core::aggregate_responses_response;
use openclaw_core::chat_request_to_turn;
use openclaw_core::responses_request_to_turn;
use openclaw_protocol::Event;
use openclaw_protocol::Turn;
use openclaw_protocol::wire::ChatCompletionsRequest;
use openclaw_protocol::wire::ResponsesRequest;
use serde_json::Value;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::admission;
use crate::errors::error_body;
use crate::errors::error_response;
use crate::errors::gateway_error_response;
use crate::state::AppState;
use crate::streaming::sse_response;

pub const SESSION_KEY_HEADER: &str = "x-openclaw-session-key";

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
const RESPONSES_PATH: &str = "/v1/responses";

/// Which client dialect the response must be rendered in.
enum OutTranslator {
    Chat(ChatStream),
    Responses(ResponsesStream),
}

impl OutTranslator {
    fn start(&self) -> Vec<Value> {
        match self {
            OutTranslator::Chat(_) => Vec::new(),
            OutTranslator::Responses(t) => vec![t.created()],
        }
    }

    fn on_event(&mut self, event: &Event) -> Vec<Value> {
        match self {
            OutTranslator::Chat(t) => t.on_event(event),
            OutTranslator::Responses(t) => t.on_event(event),
        }
    }

    fn finish(&mut self) -> Vec<Value> {
        match self {
            OutTranslator::Chat(t) => t.finish(),
            OutTranslator::Responses(t) => t.finish(),
        }
    }
}

/// Everything the completion paths need to meter and trace one request.
struct RequestMeta {
    state: Arc<AppState>,
    key: KeyRecord,
    path: &'static str,
    session_key: String,
    request_id: String,
}

impl RequestMeta {
    fn record_completion(&self, outcome: &TurnOutcome) {
        if let Some(usage) = &outcome.usage {
            let event = UsageEvent {
                ts: Utc::now(),
                key_id: self.key.id.clone(),
                label: self.key.label.clone(),
                path: self.path.to_string(),
                status: 200,
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
                total_tokens: usage.total(),
            };
            if let Err(e) = self.state.usage.record(&event) {
                warn!(error = %e, "failed to record usage");
            }
        }
        if !outcome.calls.is_empty() {
            self.state
                .sessions
                .save_tool_calls(&self.session_key, outcome.tool_call_records());
        }
        self.trace("completion", "out", json!({
            "text_len": outcome.text.len(),
            "tool_calls": outcome.calls.len(),
            "usage": outcome.usage.map(|u| u.total()),
        }));
    }

    fn audit(&self, status: u16, body: &Value) {
        if let Some(audit) = &self.state.audit {
            let entry = AuditEntry {
                ts: Utc::now(),
                request_id: self.request_id.clone(),
                key_id: self.key.id.clone(),
                path: self.path.to_string(),
                status,
                body: body.clone(),
            };
            if let Err(e) = audit.record(&entry) {
                warn!(error = %e, "failed to write audit entry");
            }
        }
    }

    fn trace(&self, phase: &str, direction: &str, payload: Value) {
        if let Some(trace) = &self.state.trace {
            let record = TraceRecord {
                ts: Utc::now(),
                request_id: self.request_id.clone(),
                layer: "gateway".to_string(),
                direction: direction.to_string(),
                path: self.path.to_string(),
                phase: phase.to_string(),
                payload,
            };
            if let Err(e) = trace.record(&record) {
                warn!(error = %e, "failed to write trace record");
            }
        }
    }
}

/// Session identity, in priority order: explicit `user` field, the
/// dedicated header, then the remote host.
fn resolve_session_key(
    user: Option<&str>,
    headers: &HeaderMap,
    addr: SocketAddr,
) -> String {
    if let Some(user) = user
        && !user.is_empty()
    {
        return user.to_string();
    }
    if let Some(value) = headers.get(SESSION_KEY_HEADER).and_then(|v| v.to_str().ok())
        && !value.is_empty()
    {
        return value.to_string();
    }
    addr.ip().to_string()
}

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

pub async fn models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(refusal) = admission::admit(&state, &headers).await {
        return refusal;
    }
    let mut data = Vec::new();
    for (name, harness) in state.router.harnesses() {
        match harness.list_models().await {
            Ok(models) => data.extend(models.into_iter().map(|m| {
                json!({"id": m.id, "object": "model", "owned_by": m.owned_by})
            })),
            Err(e) => warn!(harness = name.as_str(), error = %e, "model listing failed"),
        }
    }
    Json(json!({"object": "list", "data": data})).into_response()
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let key = match admission::admit(&state, &headers).await {
        Ok(key) => key,
        Err(refusal) => return refusal,
    };
    let req: ChatCompletionsRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {e}"),
            );
        }
    };
    let session_key = resolve_session_key(req.user.as_deref(), &headers, addr);
    state.sessions.touch(&session_key);

    let meta = RequestMeta {
        state: state.clone(),
        key,
        path: CHAT_COMPLETIONS_PATH,
        session_key: session_key.clone(),
        request_id: format!("req_{}", Uuid::new_v4().simple()),
    };
    meta.audit(200, &serde_json::from_slice(&body).unwrap_or(Value::Null));
    meta.trace("request", "in", json!({"model": req.model, "stream": req.stream}));

    let model = state.router.expand_alias(&req.model);
    let Some(harness) = state.router.harness_for(&model) else {
        return gateway_error_response(&GatewayErr::UnknownModel(model));
    };
    let turn = match chat_request_to_turn(&req, model, &state.sessions, &session_key) {
        Ok(turn) => turn,
        Err(e) => return gateway_error_response(&e),
    };

    if req.stream {
        run_streaming(meta, harness, turn, OutTranslatorKind::Chat).await
    } else {
        run_aggregate(meta, harness, turn, OutTranslatorKind::Chat).await
    }
}

pub async fn responses(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let key = match admission::admit(&state, &headers).await {
        Ok(key) => key,
        Err(refusal) => return refusal,
    };
    let req: ResponsesRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {e}"),
            );
        }
    };
    let session_key = resolve_session_key(req.user.as_deref(), &headers, addr);
    state.sessions.touch(&session_key);

    let meta = RequestMeta {
        state: state.clone(),
        key,
        path: RESPONSES_PATH,
        session_key: session_key.clone(),
        request_id: format!("req_{}", Uuid::new_v4().simple()),
    };
    meta.audit(200, &serde_json::from_slice(&body).unwrap_or(Value::Null));
    meta.trace("request", "in", json!({"model": req.model, "stream": req.stream}));

    let model = state.router.expand_alias(&req.model);
    let Some(harness) = state.router.harness_for(&model) else {
        return gateway_error_response(&GatewayErr::UnknownModel(model));
    };
    let turn = match responses_request_to_turn(&req, model, &state.sessions, &session_key) {
        Ok(turn) => turn,
        Err(e) => return gateway_error_response(&e),
    };

    if req.stream {
        run_streaming(meta, harness, turn, OutTranslatorKind::Responses).await
    } else {
        run_aggregate(meta, harness, turn, OutTranslatorKind::Responses).await
    }
}

enum OutTranslatorKind {
    Chat,
    Responses,
}

impl OutTranslatorKind {
    fn translator(&self, model: &str) -> OutTranslator {
        match self {
            OutTranslatorKind::Chat => OutTranslator::Chat(ChatStream::new(model)),
            OutTranslatorKind::Responses => {
                OutTranslator::Responses(ResponsesStream::new(model))
            }
        }
    }

    fn aggregate(&self, model: &str, outcome: &TurnOutcome) -> Value {
        match self {
            OutTranslatorKind::Chat => aggregate_chat_response(model, outcome),
            OutTranslatorKind::Responses => aggregate_responses_response(model, outcome),
        }
    }
}

/// Streaming path: commit the SSE head as soon as the upstream stream
/// opens, then pump events on a spawned task. Errors after commit are
/// conveyed in-band and the stream still terminates with `[DONE]`.
async fn run_streaming(
    meta: RequestMeta,
    harness: Arc<dyn Harness>,
    turn: Turn,
    kind: OutTranslatorKind,
) -> Response {
    let cancel = CancellationToken::new();
    let mut stream: EventStream = match harness.stream_turn(&turn, cancel.clone()).await {
        Ok(stream) => stream,
        Err(e) => return gateway_error_response(&e),
    };

    let (writer, response) = sse_response();
    let mut translator = kind.translator(&turn.model);
    tokio::spawn(async move {
        // Dropping the guard (task exit, client disconnect) cancels the
        // upstream read.
        let _guard = cancel.drop_guard();
        let mut outcome = TurnOutcome::default();

        for frame in translator.start() {
            if !writer.json(&frame).await {
                return;
            }
        }
        loop {
            let item = match stream.next().await {
                Some(item) => item,
                None => break,
            };
            match item {
                Ok(Event::Done) => {
                    outcome.absorb(&Event::Done);
                    for frame in translator.finish() {
                        if !writer.json(&frame).await {
                            return;
                        }
                    }
                    let _ = writer.done().await;
                    break;
                }
                Ok(event) => {
                    outcome.absorb(&event);
                    if let Event::Error { message } = &event {
                        let _ = writer.json(&error_body(message)).await;
                        continue;
                    }
                    for frame in translator.on_event(&event) {
                        if !writer.json(&frame).await {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = writer.json(&error_body(&e.to_string())).await;
                    let _ = writer.done().await;
                    break;
                }
            }
        }
        meta.record_completion(&outcome);
    });
    response
}

/// Non-streaming path: drive the same neutral stream to completion under
/// the request deadline and answer with one document.
async fn run_aggregate(
    meta: RequestMeta,
    harness: Arc<dyn Harness>,
    turn: Turn,
    kind: OutTranslatorKind,
) -> Response {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let deadline = *OPENCLAW_REQUEST_TIMEOUT_MS;

    let driven = tokio::time::timeout(deadline, async {
        let mut stream = harness.stream_turn(&turn, cancel.clone()).await?;
        let mut outcome = TurnOutcome::default();
        while let Some(item) = stream.next().await {
            let event = item?;
            let done = event == Event::Done;
            outcome.absorb(&event);
            if done {
                break;
            }
        }
        Ok::<TurnOutcome, GatewayErr>(outcome)
    })
    .await;

    let outcome = match driven {
        Err(_) => {
            return gateway_error_response(&GatewayErr::Stream(
                "upstream timed out before completion".into(),
            ));
        }
        Ok(Err(e)) => return gateway_error_response(&e),
        Ok(Ok(outcome)) => outcome,
    };

    if let Some(message) = &outcome.error {
        return gateway_error_response(&GatewayErr::Stream(message.clone()));
    }

    meta.record_completion(&outcome);
    Json(kind.aggregate(&turn.model, &outcome)).into_response()
}
