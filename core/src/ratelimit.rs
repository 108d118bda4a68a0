//! Per-key token-bucket rate limiting.
//!
//! Buckets are keyed by key id and configured from the key record's rate
//! spec (`"N/unit"`). An unparseable spec produces an always-allow sentinel
//! so a misconfigured key does not hard-fail legitimate traffic.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tracing::warn;

/// Parse `"N/unit"` into (tokens-per-second, N). Returns `None` for
/// anything that does not match the grammar.
pub(crate) fn parse_rate_spec(spec: &str) -> Option<(f64, f64)> {
    let (count, unit) = spec.trim().split_once('/')?;
    let n: u64 = count.trim().parse().ok()?;
    if n == 0 {
        return None;
    }
    let seconds = match unit.trim().to_lowercase().as_str() {
        "s" | "sec" | "second" => 1.0,
        "m" | "min" | "minute" => 60.0,
        "h" | "hr" | "hour" => 3600.0,
        _ => return None,
    };
    Some((n as f64 / seconds, n as f64))
}

#[derive(Debug)]
struct Bucket {
    /// The spec the bucket was built from, so a policy change rebuilds it.
    spec: String,
    burst: u32,
    tokens: f64,
    capacity: f64,
    rate: f64,
    last: Instant,
}

impl Bucket {
    fn new(spec: &str, burst: u32) -> Self {
        let (rate, capacity) = match parse_rate_spec(spec) {
            Some((rate, n)) => (rate, f64::max(burst as f64, n)),
            None => {
                if !spec.trim().is_empty() {
                    warn!(spec, "invalid rate spec; key is not rate limited");
                }
                (0.0, f64::INFINITY)
            }
        };
        Self {
            spec: spec.to_string(),
            burst,
            tokens: capacity,
            capacity,
            rate,
            last: Instant::now(),
        }
    }

    fn allow(&mut self) -> bool {
        if self.capacity.is_infinite() {
            return true;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = f64::min(self.capacity, self.tokens + self.rate * elapsed);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Debit one token for `key_id` under the given policy. Bucket state
    /// outlives individual requests; the bucket is rebuilt when the key's
    /// policy changes.
    pub fn allow(&self, key_id: &str, rate_spec: &str, burst: u32) -> bool {
        let Ok(mut buckets) = self.buckets.lock() else {
            return true;
        };
        let rebuild = buckets
            .get(key_id)
            .is_some_and(|b| b.spec != rate_spec || b.burst != burst);
        if rebuild {
            buckets.remove(key_id);
        }
        buckets
            .entry(key_id.to_string())
            .or_insert_with(|| Bucket::new(rate_spec, burst))
            .allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_all_unit_spellings() {
        for (spec, rate) in [
            ("1/s", 1.0),
            ("2/sec", 2.0),
            ("3/second", 3.0),
            ("60/m", 1.0),
            ("60/min", 1.0),
            ("120/minute", 2.0),
            ("3600/h", 1.0),
            ("3600/hr", 1.0),
            ("7200/hour", 2.0),
        ] {
            let (per_sec, _) = parse_rate_spec(spec).unwrap_or((f64::NAN, f64::NAN));
            assert!((per_sec - rate).abs() < 1e-9, "spec {spec}: {per_sec}");
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        for spec in ["", "fast", "10", "10/fortnight", "x/s", "0/s"] {
            assert!(parse_rate_spec(spec).is_none(), "spec {spec}");
        }
    }

    #[test]
    fn burst_is_honored_then_exhausted() {
        let limiter = RateLimiter::new();
        // Capacity is max(burst, N) = 2; three back-to-back calls cannot all
        // pass inside one refill interval.
        assert!(limiter.allow("k", "2/s", 2));
        assert!(limiter.allow("k", "2/s", 2));
        assert!(!limiter.allow("k", "2/s", 2));
    }

    #[test]
    fn capacity_is_max_of_burst_and_n() {
        let limiter = RateLimiter::new();
        for i in 0..5 {
            assert!(limiter.allow("k", "1/h", 5), "call {i}");
        }
        assert!(!limiter.allow("k", "1/h", 5));
    }

    #[test]
    fn invalid_spec_always_allows() {
        let limiter = RateLimiter::new();
        for _ in 0..100 {
            assert!(limiter.allow("k", "not-a-spec", 0));
        }
    }

    #[test]
    fn buckets_are_per_key() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("a", "1/h", 1));
        assert!(!limiter.allow("a", "1/h", 1));
        assert!(limiter.allow("b", "1/h", 1));
    }

    #[test]
    fn policy_change_rebuilds_bucket() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("k", "1/h", 1));
        assert!(!limiter.allow("k", "1/h", 1));
        // Loosened policy takes effect immediately.
        assert!(limiter.allow("k", "100/s", 100));
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("k", "50/s", 1));
        assert!(!limiter.allow("k", "50/s", 1));
        std::thread::sleep(std::time::Duration::from_millis(40));
        assert!(limiter.allow("k", "50/s", 1));
    }
}
