//! Rate Limiting
//!
//! Token bucket limiter keyed by an arbitrary string: the signaling server
//! uses one instance keyed by identity for chat events and one keyed by
//! wallet address for nonce requests.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Token bucket for a single key.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    /// Tokens added per second.
    refill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(max_tokens: u32, refill_rate: f64) -> Self {
        TokenBucket {
            tokens: max_tokens as f64,
            max_tokens: max_tokens as f64,
            refill_rate,
            last_update: Instant::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-key rate limiter.
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, TokenBucket>>,
    max_per_minute: u32,
}

impl RateLimiter {
    /// Creates a limiter allowing `max_per_minute` operations per key, with
    /// burst capacity equal to one minute's allowance.
    pub fn new(max_per_minute: u32) -> Self {
        RateLimiter {
            buckets: RwLock::new(HashMap::new()),
            max_per_minute,
        }
    }

    /// Consumes one token for `key`. Returns false when rate limited.
    pub fn consume(&self, key: &str) -> bool {
        let mut buckets = self.buckets.write().unwrap();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| {
            TokenBucket::new(self.max_per_minute, self.max_per_minute as f64 / 60.0)
        });
        bucket.try_consume()
    }

    /// Drops buckets untouched for `max_idle`, returning how many were
    /// removed. Driven by a periodic background task so abandoned keys do not
    /// accumulate.
    pub fn cleanup_inactive(&self, max_idle: Duration) -> usize {
        let mut buckets = self.buckets.write().unwrap();
        let now = Instant::now();
        let before = buckets.len();
        buckets.retain(|_, b| now.duration_since(b.last_update) < max_idle);
        before - buckets.len()
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        let buckets = self.buckets.read().unwrap();
        buckets.len()
    }
}
