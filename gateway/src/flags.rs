use env_flags::env_flags;

env_flags! {
    pub OPENCLAW_LISTEN_ADDR: &str = "127.0.0.1:8089";

    /// Directory for the keys file and JSONL logs; defaults to
    /// `~/.openclaw`.
    pub OPENCLAW_STATE_DIR: Option<&str> = None;

    /// Accept any bearer token as an anonymous key (local development).
    pub OPENCLAW_ALLOW_ANY_KEY: bool = false;

    /// Single static API key accepted in addition to the key store.
    pub OPENCLAW_API_KEY: Option<&str> = None;

    pub OPENCLAW_LOG_MAX_BYTES: u64 = 10_485_760;
    pub OPENCLAW_LOG_MAX_BACKUPS: u64 = 5;

    /// Sliding usage-counter window in seconds; 0 meters forever.
    pub OPENCLAW_USAGE_WINDOW_SECS: u64 = 0;
}
