use axum::Json;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::RETRY_AFTER;
use axum::response::IntoResponse;
use axum::response::Response;
use openclaw_core::GatewayErr;
use serde_json::Value;
use serde_json::json;

/// The wire error shape: `{"error":{"message":..,"type":"proxy_error"}}`.
pub fn error_body(message: &str) -> Value {
    json!({"error": {"message": message, "type": "proxy_error"}})
}

pub fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(error_body(message))).into_response()
}

pub fn error_response_with_retry(
    status: StatusCode,
    message: &str,
    retry_after_secs: u64,
) -> Response {
    let mut response = error_response(status, message);
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
    response
}

/// Map an engine error to its fixed HTTP status.
pub fn gateway_error_response(err: &GatewayErr) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match err {
        GatewayErr::RateLimited => error_response_with_retry(status, &err.to_string(), 5),
        GatewayErr::QuotaExceeded => error_response_with_retry(status, &err.to_string(), 3600),
        _ => error_response(status, &err.to_string()),
    }
}
