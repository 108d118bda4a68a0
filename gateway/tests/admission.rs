#![allow(clippy::unwrap_used)]
//! Admission pipeline: authentication, rate limiting, quota.

mod common;

use chrono::Utc;
use common::MockHarness;
use common::anonymous_config;
use common::spawn;
use common::text_script;
use openclaw_core::KeyStore;
use openclaw_core::ModelRouter;
use openclaw_core::UsageEvent;
use openclaw_gateway::GatewayConfig;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;

fn chat_body() -> Value {
    json!({
        "model": "claude-sonnet-4-5",
        "messages": [{"role": "user", "content": "Hi"}],
    })
}

fn router() -> ModelRouter {
    ModelRouter::new().register(
        "claude",
        MockHarness::new("claude", "claude-", text_script("ok")),
    )
}

#[tokio::test]
async fn missing_bearer_is_401() {
    let server = spawn(router(), anonymous_config(), None).await;
    let resp = reqwest::Client::new()
        .post(server.url("/v1/chat/completions"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "proxy_error");
}

#[tokio::test]
async fn key_store_validates_real_keys() {
    let dir = tempfile::tempdir().unwrap();
    let keys = KeyStore::load(dir.path().join("keys.json")).unwrap();
    let (_record, secret) = keys.add("ci", "", 0, 0, None, None).unwrap();
    let server = spawn(router(), GatewayConfig::default(), Some(keys)).await;

    let client = reqwest::Client::new();
    let ok = client
        .post(server.url("/v1/chat/completions"))
        .bearer_auth(&secret)
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status().as_u16(), 200);

    let bad = client
        .post(server.url("/v1/chat/completions"))
        .bearer_auth("oclaw_not_a_real_key")
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status().as_u16(), 401);
}

#[tokio::test]
async fn revoked_key_fails_on_the_next_request() {
    let dir = tempfile::tempdir().unwrap();
    let keys = KeyStore::load(dir.path().join("keys.json")).unwrap();
    let (record, secret) = keys.add("ci", "", 0, 0, None, None).unwrap();
    let server = spawn(router(), GatewayConfig::default(), Some(keys)).await;

    let client = reqwest::Client::new();
    let ok = client
        .post(server.url("/v1/chat/completions"))
        .bearer_auth(&secret)
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status().as_u16(), 200);

    server
        .state
        .keys
        .as_ref()
        .unwrap()
        .revoke(&record.id)
        .unwrap();

    let denied = client
        .post(server.url("/v1/chat/completions"))
        .bearer_auth(&secret)
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 401);
}

#[tokio::test]
async fn static_api_key_is_accepted() {
    let config = GatewayConfig {
        allow_any_key: false,
        api_key: Some("pre-shared".to_string()),
    };
    let server = spawn(router(), config, None).await;
    let resp = reqwest::Client::new()
        .post(server.url("/v1/chat/completions"))
        .bearer_auth("pre-shared")
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
}

#[tokio::test]
async fn rate_limited_key_gets_429_with_retry_after() {
    let dir = tempfile::tempdir().unwrap();
    let keys = KeyStore::load(dir.path().join("keys.json")).unwrap();
    let (_record, secret) = keys.add("burst", "2/s", 2, 0, None, None).unwrap();
    let server = spawn(router(), GatewayConfig::default(), Some(keys)).await;

    let client = reqwest::Client::new();
    for _ in 0..2 {
        let resp = client
            .post(server.url("/v1/chat/completions"))
            .bearer_auth(&secret)
            .json(&chat_body())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
    }
    let denied = client
        .post(server.url("/v1/chat/completions"))
        .bearer_auth(&secret)
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 429);
    assert_eq!(
        denied
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok()),
        Some("5")
    );
}

#[tokio::test]
async fn exhausted_quota_gets_429_with_hour_retry() {
    let dir = tempfile::tempdir().unwrap();
    let keys = KeyStore::load(dir.path().join("keys.json")).unwrap();
    let (record, secret) = keys.add("metered", "", 0, 100, None, None).unwrap();
    let server = spawn(router(), GatewayConfig::default(), Some(keys)).await;

    // Pre-load the counter past the quota.
    server
        .state
        .usage
        .record(&UsageEvent {
            ts: Utc::now(),
            key_id: record.id.clone(),
            label: "metered".to_string(),
            path: "/v1/chat/completions".to_string(),
            status: 200,
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
        })
        .unwrap();

    let denied = reqwest::Client::new()
        .post(server.url("/v1/chat/completions"))
        .bearer_auth(&secret)
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 429);
    assert_eq!(
        denied
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok()),
        Some("3600")
    );
}

#[tokio::test]
async fn usage_is_recorded_after_completion() {
    let server = spawn(router(), anonymous_config(), None).await;
    let resp = reqwest::Client::new()
        .post(server.url("/v1/chat/completions"))
        .bearer_auth("whoever")
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    // text_script reports 5 + 6 tokens; the anonymous key id meters them.
    assert_eq!(server.state.usage.total_tokens("anonymous"), 11);
}
