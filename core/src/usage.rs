//! Token-usage metering: an append-only event log plus in-memory counters.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;
use crate::logs::RotatingLog;

/// Sentinel path that zeroes a key's counter instead of adding to it.
pub const USAGE_RESET_PATH: &str = "__reset__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub ts: DateTime<Utc>,
    pub key_id: String,
    pub label: String,
    pub path: String,
    pub status: u16,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Serialize)]
struct UsageSummary<'a> {
    generated_at: DateTime<Utc>,
    totals: &'a HashMap<String, u64>,
    last_seen: &'a HashMap<String, DateTime<Utc>>,
}

struct UsageState {
    counts: HashMap<String, u64>,
    last_seen: HashMap<String, DateTime<Utc>>,
    window_start: Instant,
}

pub struct UsageStore {
    log: Mutex<RotatingLog>,
    state: Mutex<UsageState>,
    summary_path: Option<PathBuf>,
    /// Sliding window after which all counters reset wholesale; `None`
    /// meters forever.
    window: Option<Duration>,
}

impl UsageStore {
    pub fn new(
        log_path: impl Into<PathBuf>,
        max_bytes: u64,
        max_backups: usize,
        summary_path: Option<PathBuf>,
        window: Option<Duration>,
    ) -> Self {
        Self {
            log: Mutex::new(RotatingLog::new(log_path, max_bytes, max_backups)),
            state: Mutex::new(UsageState {
                counts: HashMap::new(),
                last_seen: HashMap::new(),
                window_start: Instant::now(),
            }),
            summary_path,
            window,
        }
    }

    fn maybe_reset_window(window: Option<Duration>, state: &mut UsageState) {
        if let Some(window) = window
            && state.window_start.elapsed() >= window
        {
            state.counts.clear();
            state.last_seen.clear();
            state.window_start = Instant::now();
        }
    }

    /// Append the event and fold it into the in-memory counters. Counter
    /// updates never fail; log/summary write failures are surfaced.
    pub fn record(&self, event: &UsageEvent) -> Result<()> {
        {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            Self::maybe_reset_window(self.window, &mut state);
            if event.path == USAGE_RESET_PATH {
                state.counts.insert(event.key_id.clone(), 0);
            } else {
                *state.counts.entry(event.key_id.clone()).or_default() += event.total_tokens;
            }
            state.last_seen.insert(event.key_id.clone(), event.ts);
            if let Some(summary_path) = &self.summary_path {
                let summary = UsageSummary {
                    generated_at: Utc::now(),
                    totals: &state.counts,
                    last_seen: &state.last_seen,
                };
                let mirrored = serde_json::to_vec_pretty(&summary)
                    .map_err(std::io::Error::other)
                    .and_then(|bytes| std::fs::write(summary_path, bytes));
                if let Err(e) = mirrored {
                    warn!(error = %e, "failed to mirror usage summary");
                }
            }
        }
        match self.log.lock() {
            Ok(log) => log.append(event),
            Err(_) => Ok(()),
        }
    }

    /// Current counter for a key, after the sliding-window check.
    pub fn total_tokens(&self, key_id: &str) -> u64 {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        Self::maybe_reset_window(self.window, &mut state);
        state.counts.get(key_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    fn event(key: &str, path: &str, total: u64) -> UsageEvent {
        UsageEvent {
            ts: Utc::now(),
            key_id: key.into(),
            label: "test".into(),
            path: path.into(),
            status: 200,
            prompt_tokens: total / 2,
            completion_tokens: total - total / 2,
            total_tokens: total,
        }
    }

    #[test]
    fn counters_accumulate_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = UsageStore::new(dir.path().join("usage.jsonl"), 0, 0, None, None);
        store.record(&event("a", "/v1/responses", 100)).unwrap();
        store.record(&event("a", "/v1/responses", 40)).unwrap();
        store.record(&event("b", "/v1/chat/completions", 7)).unwrap();
        assert_eq!(store.total_tokens("a"), 140);
        assert_eq!(store.total_tokens("b"), 7);
        assert_eq!(store.total_tokens("missing"), 0);
    }

    #[test]
    fn reset_marker_zeroes_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = UsageStore::new(dir.path().join("usage.jsonl"), 0, 0, None, None);
        store.record(&event("a", "/v1/responses", 100)).unwrap();
        store.record(&event("b", "/v1/responses", 50)).unwrap();
        store.record(&event("a", USAGE_RESET_PATH, 0)).unwrap();
        assert_eq!(store.total_tokens("a"), 0);
        assert_eq!(store.total_tokens("b"), 50);
    }

    #[test]
    fn events_land_in_the_jsonl_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.jsonl");
        let store = UsageStore::new(&path, 0, 0, None, None);
        store.record(&event("a", "/v1/responses", 12)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: UsageEvent = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(parsed.key_id, "a");
        assert_eq!(parsed.total_tokens, 12);
    }

    #[test]
    fn sliding_window_resets_all_counters() {
        let dir = tempfile::tempdir().unwrap();
        let store = UsageStore::new(
            dir.path().join("usage.jsonl"),
            0,
            0,
            None,
            Some(Duration::from_millis(30)),
        );
        store.record(&event("a", "/v1/responses", 100)).unwrap();
        assert_eq!(store.total_tokens("a"), 100);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(store.total_tokens("a"), 0);
    }

    #[test]
    fn summary_mirror_is_rewritten_on_each_record() {
        let dir = tempfile::tempdir().unwrap();
        let summary = dir.path().join("summary.json");
        let store = UsageStore::new(
            dir.path().join("usage.jsonl"),
            0,
            0,
            Some(summary.clone()),
            None,
        );
        store.record(&event("a", "/v1/responses", 9)).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&summary).unwrap()).unwrap();
        assert_eq!(parsed["totals"]["a"], 9);
    }
}
