#![allow(clippy::unwrap_used, dead_code)]

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use openclaw_core::EventStream;
use openclaw_core::Harness;
use openclaw_core::KeyStore;
use openclaw_core::ModelInfo;
use openclaw_core::ModelRouter;
use openclaw_core::RateLimiter;
use openclaw_core::Result;
use openclaw_core::SessionCache;
use openclaw_core::UsageStore;
use openclaw_gateway::AppState;
use openclaw_gateway::GatewayConfig;
use openclaw_protocol::Event;
use openclaw_protocol::Turn;
use tokio_util::sync::CancellationToken;

/// A scripted harness: records every turn it receives and plays back a fixed
/// event sequence.
pub struct MockHarness {
    name: &'static str,
    prefix: &'static str,
    aliases: Vec<(&'static str, &'static str)>,
    script: Vec<Event>,
    pub seen: Mutex<Vec<Turn>>,
}

impl MockHarness {
    pub fn new(name: &'static str, prefix: &'static str, script: Vec<Event>) -> Arc<Self> {
        Arc::new(Self {
            name,
            prefix,
            aliases: Vec::new(),
            script,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn with_aliases(
        name: &'static str,
        prefix: &'static str,
        aliases: Vec<(&'static str, &'static str)>,
        script: Vec<Event>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            prefix,
            aliases,
            script,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn last_turn(&self) -> Turn {
        self.seen.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl Harness for MockHarness {
    fn name(&self) -> &str {
        self.name
    }

    fn matches_model(&self, model: &str) -> bool {
        model.to_lowercase().starts_with(self.prefix)
    }

    fn expand_alias<'a>(&self, model: &'a str) -> Cow<'a, str> {
        let lowered = model.to_lowercase();
        for (alias, expansion) in &self.aliases {
            if lowered == *alias {
                return Cow::Owned((*expansion).to_string());
            }
        }
        Cow::Borrowed(model)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: format!("{}model", self.prefix),
            owned_by: self.name.to_string(),
        }])
    }

    async fn stream_turn(&self, turn: &Turn, _cancel: CancellationToken) -> Result<EventStream> {
        self.seen.lock().unwrap().push(turn.clone());
        let script = self.script.clone();
        let (tx_event, stream) = EventStream::channel(32);
        tokio::spawn(async move {
            for event in script {
                if tx_event.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        });
        Ok(stream)
    }
}

/// Simple text-producing script ending in usage + done.
pub fn text_script(text: &str) -> Vec<Event> {
    vec![
        Event::Text {
            delta: text.to_string(),
        },
        Event::Usage(openclaw_protocol::TokenUsage {
            input_tokens: 5,
            output_tokens: 6,
        }),
        Event::Done,
    ]
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    _state_dir: tempfile::TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

/// Spin the gateway up on an ephemeral port.
pub async fn spawn(router: ModelRouter, config: GatewayConfig, keys: Option<KeyStore>) -> TestServer {
    let state_dir = tempfile::tempdir().unwrap();
    let state = Arc::new(AppState {
        router,
        sessions: SessionCache::default(),
        keys,
        limiter: RateLimiter::new(),
        usage: UsageStore::new(state_dir.path().join("usage.jsonl"), 0, 0, None, None),
        audit: None,
        trace: None,
        payments: None,
        config,
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serve_state = state.clone();
    tokio::spawn(async move {
        openclaw_gateway::serve(serve_state, listener).await.unwrap();
    });
    TestServer {
        addr,
        state,
        _state_dir: state_dir,
    }
}

pub fn anonymous_config() -> GatewayConfig {
    GatewayConfig {
        allow_any_key: true,
        api_key: None,
    }
}

/// Split an SSE body into its `data:` payloads.
pub fn sse_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

pub fn json_payloads(body: &str) -> Vec<serde_json::Value> {
    sse_payloads(body)
        .into_iter()
        .filter(|p| p != "[DONE]")
        .map(|p| serde_json::from_str(&p).unwrap())
        .collect()
}
