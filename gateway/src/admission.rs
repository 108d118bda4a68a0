//! The ordered gate every handler runs before doing work: payment
//! redemption, authentication, rate limiting, quota enforcement.

use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::Response;
use chrono::Utc;
use openclaw_core::KeyRecord;
use tracing::debug;

use crate::errors::error_response;
use crate::errors::error_response_with_retry;
use crate::payments::ChallengeKind;
use crate::state::AppState;

const RETRY_AFTER_RATE_SECS: u64 = 5;
const RETRY_AFTER_QUOTA_SECS: u64 = 3600;

fn synthetic_record(id: &str, label: &str) -> KeyRecord {
    KeyRecord {
        id: id.to_string(),
        label: label.to_string(),
        hash: String::new(),
        created_at: Utc::now(),
        expires_at: None,
        revoked_at: None,
        rate: String::new(),
        burst: 0,
        quota_tokens: 0,
        token_balance: 0,
        token_allowance: 0,
        allowance_duration_secs: 0,
    }
}

fn challenge_response(state: &AppState, kind: ChallengeKind, message: &str) -> Response {
    let Some(gate) = &state.payments else {
        return error_response(StatusCode::UNAUTHORIZED, message);
    };
    let mut response = error_response(StatusCode::PAYMENT_REQUIRED, message);
    if let Ok(value) = HeaderValue::from_str(&gate.challenge(kind)) {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

/// Run the admission sequence. `Ok` carries the key identity the request
/// executes under; `Err` is the finished refusal response.
pub async fn admit(state: &AppState, headers: &HeaderMap) -> Result<KeyRecord, Response> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    // Payment redemption short-circuits the rest of authentication.
    let key = if authorization.starts_with("L402 ") {
        match &state.payments {
            Some(gate) => {
                let verdict = gate.redeem(authorization).await;
                if !verdict.accepted {
                    return Err(error_response(StatusCode::UNAUTHORIZED, &verdict.message));
                }
                verdict
                    .key
                    .unwrap_or_else(|| synthetic_record("l402", "l402"))
            }
            None => {
                return Err(error_response(
                    StatusCode::UNAUTHORIZED,
                    "payments are not enabled",
                ));
            }
        }
    } else {
        let Some(token) = authorization.strip_prefix("Bearer ").map(str::trim) else {
            return Err(challenge_response(
                state,
                ChallengeKind::Auth,
                "missing bearer token",
            ));
        };
        if token.is_empty() {
            return Err(challenge_response(
                state,
                ChallengeKind::Auth,
                "missing bearer token",
            ));
        }
        if state.config.allow_any_key {
            synthetic_record("anonymous", "anonymous")
        } else if state
            .config
            .api_key
            .as_deref()
            .is_some_and(|key| key == token)
        {
            synthetic_record("static", "api-key")
        } else {
            let validated = state.keys.as_ref().and_then(|keys| keys.validate(token));
            match validated {
                Some(record) => record,
                None => {
                    return Err(error_response(
                        StatusCode::UNAUTHORIZED,
                        "invalid or revoked API key",
                    ));
                }
            }
        }
    };

    if !state.limiter.allow(&key.id, &key.rate, key.burst) {
        debug!(key_id = key.id.as_str(), "rate limited");
        return Err(error_response_with_retry(
            StatusCode::TOO_MANY_REQUESTS,
            "rate limit exceeded",
            RETRY_AFTER_RATE_SECS,
        ));
    }

    if key.quota_tokens > 0 && state.usage.total_tokens(&key.id) >= key.quota_tokens {
        debug!(key_id = key.id.as_str(), "token quota exhausted");
        if state.payments.is_some() {
            let mut response = challenge_response(
                state,
                ChallengeKind::Topup,
                "token quota exceeded",
            );
            *response.status_mut() = StatusCode::PAYMENT_REQUIRED;
            return Err(response);
        }
        return Err(error_response_with_retry(
            StatusCode::TOO_MANY_REQUESTS,
            "token quota exceeded",
            RETRY_AFTER_QUOTA_SECS,
        ));
    }

    Ok(key)
}
