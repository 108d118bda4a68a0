use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayErr>;

#[derive(Error, Debug)]
pub enum GatewayErr {
    /// JSON decode failures, unknown models, structurally broken tool items.
    #[error("{0}")]
    Malformed(String),

    #[error("no harness matches model: {0}")]
    UnknownModel(String),

    #[error("{0}")]
    Auth(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("token quota exceeded")]
    QuotaExceeded,

    /// Unexpected HTTP status from an upstream, with a body excerpt so the
    /// provider's own error message survives to the client.
    #[error("unexpected status {0}: {1}")]
    UnexpectedStatus(StatusCode, String),

    /// Retry limit exceeded.
    #[error("exceeded retry limit, last status: {0}")]
    RetryLimit(StatusCode),

    /// The upstream SSE stream disconnected or errored out after the HTTP
    /// handshake succeeded but before it finished.
    #[error("stream disconnected before completion: {0}")]
    Stream(String),

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GatewayErr {
    /// Stable machine-readable class, one per taxonomy entry.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayErr::Malformed(_) | GatewayErr::UnknownModel(_) | GatewayErr::Json(_) => {
                "malformed_request"
            }
            GatewayErr::Auth(_) => "auth_failure",
            GatewayErr::RateLimited => "rate_limited",
            GatewayErr::QuotaExceeded => "quota_exceeded",
            GatewayErr::UnexpectedStatus(..)
            | GatewayErr::RetryLimit(_)
            | GatewayErr::Stream(_)
            | GatewayErr::Reqwest(_) => "upstream_failure",
            GatewayErr::Cancelled => "cancelled",
            GatewayErr::Io(_) => "internal",
        }
    }

    /// HTTP status the handler should answer with when no bytes have been
    /// written yet.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayErr::Malformed(_) | GatewayErr::UnknownModel(_) | GatewayErr::Json(_) => 400,
            GatewayErr::Auth(_) => 401,
            GatewayErr::RateLimited | GatewayErr::QuotaExceeded => 429,
            GatewayErr::UnexpectedStatus(..)
            | GatewayErr::RetryLimit(_)
            | GatewayErr::Stream(_)
            | GatewayErr::Reqwest(_) => 502,
            GatewayErr::Cancelled => 499,
            GatewayErr::Io(_) => 500,
        }
    }
}
