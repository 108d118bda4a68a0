use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use openclaw_core::AnthropicHarness;
use openclaw_core::AuditLog;
use openclaw_core::CodexHarness;
use openclaw_core::KeyStore;
use openclaw_core::ModelRouter;
use openclaw_core::RateLimiter;
use openclaw_core::SessionCache;
use openclaw_core::StaticToken;
use openclaw_core::TraceLog;
use openclaw_core::UsageStore;

use crate::flags::OPENCLAW_ALLOW_ANY_KEY;
use crate::flags::OPENCLAW_API_KEY;
use crate::flags::OPENCLAW_LOG_MAX_BACKUPS;
use crate::flags::OPENCLAW_LOG_MAX_BYTES;
use crate::flags::OPENCLAW_STATE_DIR;
use crate::flags::OPENCLAW_USAGE_WINDOW_SECS;
use crate::payments::PaymentGate;

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Accept any bearer token as an anonymous key.
    pub allow_any_key: bool,
    /// A single static key accepted alongside the key store.
    pub api_key: Option<String>,
}

pub struct AppState {
    pub router: ModelRouter,
    pub sessions: SessionCache,
    pub keys: Option<KeyStore>,
    pub limiter: RateLimiter,
    pub usage: UsageStore,
    pub audit: Option<AuditLog>,
    pub trace: Option<TraceLog>,
    pub payments: Option<Arc<dyn PaymentGate>>,
    pub config: GatewayConfig,
}

impl AppState {
    /// Assemble the default production state: codex + anthropic harnesses
    /// with env-provided credentials, stores rooted in the state directory.
    pub fn from_env() -> openclaw_core::Result<Self> {
        let state_dir = match *OPENCLAW_STATE_DIR {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".openclaw"),
        };

        let codex_creds = Arc::new(StaticToken::new(
            (*openclaw_core::CHATGPT_ACCESS_TOKEN).map(str::to_string),
            (*openclaw_core::CHATGPT_ACCOUNT_ID).map(str::to_string),
        ));
        let anthropic_creds = Arc::new(StaticToken::new(
            (*openclaw_core::ANTHROPIC_OAUTH_TOKEN).map(str::to_string),
            None,
        ));
        let router = ModelRouter::new()
            .register(
                "codex",
                Arc::new(CodexHarness::new(*openclaw_core::CHATGPT_API_BASE, codex_creds)),
            )
            .register(
                "claude",
                Arc::new(AnthropicHarness::new(
                    *openclaw_core::ANTHROPIC_API_BASE,
                    anthropic_creds,
                )),
            );

        let max_bytes = *OPENCLAW_LOG_MAX_BYTES;
        let max_backups = *OPENCLAW_LOG_MAX_BACKUPS as usize;
        let window = match *OPENCLAW_USAGE_WINDOW_SECS {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            router,
            sessions: SessionCache::default(),
            keys: Some(KeyStore::load(state_dir.join("keys.json"))?),
            limiter: RateLimiter::new(),
            usage: UsageStore::new(
                state_dir.join("usage.jsonl"),
                max_bytes,
                max_backups,
                Some(state_dir.join("usage-summary.json")),
                window,
            ),
            audit: Some(AuditLog::new(
                state_dir.join("audit.jsonl"),
                max_bytes,
                max_backups,
            )),
            trace: Some(TraceLog::new(
                state_dir.join("trace.jsonl"),
                max_bytes,
                max_backups,
            )),
            payments: None,
            config: GatewayConfig {
                allow_any_key: *OPENCLAW_ALLOW_ANY_KEY,
                api_key: (*OPENCLAW_API_KEY).map(str::to_string),
            },
        })
    }
}
