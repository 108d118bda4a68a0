use std::time::Duration;

use rand::Rng;

/// Retry delay schedule: 200ms, 400ms, 600ms, ... with a little jitter so
/// concurrent requests don't re-hit the upstream in lockstep.
pub(crate) fn retry_delay(attempt: u64) -> Duration {
    let base_delay_ms = 200u64.saturating_mul(attempt.max(1));
    let jitter = rand::rng().random_range(0.8..1.2);
    let delay_ms = (base_delay_ms as f64 * jitter) as u64;
    Duration::from_millis(delay_ms)
}

/// Truncate an upstream error body so it can travel inside our own error
/// message without flooding logs.
pub(crate) fn excerpt(body: &str) -> String {
    const MAX: usize = 2048;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}
