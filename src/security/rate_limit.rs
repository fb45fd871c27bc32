//! Keyed token-bucket rate limiting.
//!
//! The contract is `allow(key, rps, burst)`: admit when the key's bucket
//! holds at least one token, where the bucket refills continuously at
//! `rps` tokens per second and holds at most `burst`. Rate and capacity
//! are inputs to every call rather than stored per bucket, so a hot
//! reload that changes a route's limits applies on the next request.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Fill level of one bucket as last observed. Between observations the
/// level is defined by `level + rate * elapsed`, saturated at capacity;
/// bringing it forward lazily on each call avoids any background refill
/// task.
struct Bucket {
    level: f64,
    as_of: Instant,
}

impl Bucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            level: capacity,
            as_of: now,
        }
    }

    /// Bring the level forward to `now` under the given parameters, then
    /// charge one token if a whole one is available.
    fn charge(&mut self, now: Instant, rate: f64, capacity: f64) -> bool {
        let grown = rate * now.duration_since(self.as_of).as_secs_f64();
        self.level = capacity.min(self.level + grown);
        self.as_of = now;

        if self.level < 1.0 {
            return false;
        }
        self.level -= 1.0;
        true
    }
}

/// Token buckets keyed by an arbitrary string; the forwarder keys by
/// route name.
#[derive(Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether one request is admitted under `rps`/`burst` for `key`.
    /// New buckets start full, so the first `burst` requests pass.
    pub fn allow(&self, key: &str, rps: f64, burst: u32) -> bool {
        let now = Instant::now();
        let capacity = f64::from(burst.max(1));
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::full(capacity, now))
            .charge(now, rps, capacity)
    }
}
