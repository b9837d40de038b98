//! Continuous-refill token-bucket rate limiting.
//!
//! Generic over an [`Environment`] so the same limiter code runs against
//! real wall-clock time in production and virtual time under simulation in
//! `diode-harness`.

use std::{collections::HashMap, time::Duration};

use crate::env::Environment;

/// Outcome of a [`TokenBucket::try_consume`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was admitted; tokens were decremented.
    Allow,
    /// The request was denied; tokens are unchanged.
    Deny,
}

/// A single continuous-refill token bucket.
///
/// Refill is proportional to elapsed wall time rather than a periodic
/// top-up: a fixed-interval top-up can leak roughly double the configured
/// rate at sub-interval windows, which continuous refill avoids.
#[derive(Debug, Clone)]
pub struct TokenBucket<E: Environment> {
    capacity: f64,
    rate: f64,
    tokens: f64,
    last_refill: E::Instant,
}

impl<E: Environment> TokenBucket<E> {
    /// Creates a bucket starting full: `tokens := capacity` at construction,
    /// since `capacity` defaults to `rate` for both limiters this crate
    /// offers.
    #[must_use]
    pub fn new(env: &E, rate: f64, capacity: f64) -> Self {
        Self { capacity, rate, tokens: capacity, last_refill: env.now() }
    }

    /// Attempts to consume `n` tokens, refilling first based on elapsed
    /// time since the last call.
    pub fn try_consume(&mut self, env: &E, n: f64) -> Admission {
        self.refill(env);

        if self.tokens >= n {
            self.tokens -= n;
            Admission::Allow
        } else {
            Admission::Deny
        }
    }

    fn refill(&mut self, env: &E) {
        let now = env.now();
        let elapsed = now - self.last_refill;
        self.last_refill = now;

        let added = elapsed.as_secs_f64() * self.rate;
        self.tokens = (self.tokens + added).min(self.capacity);
    }

    /// Reconfigures the rate at runtime. Resets `tokens` to the new rate
    /// value and `last_refill` to now, rather than preserving the bucket's
    /// prior fill level.
    pub fn set_rate(&mut self, env: &E, rate: f64) {
        self.rate = rate;
        self.tokens = rate;
        self.last_refill = env.now();
    }

    /// Current token count, for diagnostics and tests.
    #[must_use]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

/// A per-key (typically per-source-IP) collection of token buckets, aged out
/// on an LRU basis to bound memory use under a churning client population.
///
/// An optional third limiter tier: a per-source-IP limiter may be layered
/// on top of the global and protocol limiters, with LRU-aged state.
pub struct KeyedLimiter<K: Eq + std::hash::Hash + Clone, E: Environment> {
    rate: f64,
    capacity: f64,
    max_keys: usize,
    buckets: HashMap<K, (TokenBucket<E>, E::Instant)>,
}

impl<K: Eq + std::hash::Hash + Clone, E: Environment> KeyedLimiter<K, E> {
    /// Creates a keyed limiter; `max_keys` bounds how many distinct keys are
    /// tracked before the least-recently-used one is evicted.
    #[must_use]
    pub fn new(rate: f64, capacity: f64, max_keys: usize) -> Self {
        Self { rate, capacity, max_keys, buckets: HashMap::new() }
    }

    /// Attempts to consume one token from `key`'s bucket, creating it on
    /// first use.
    pub fn try_consume(&mut self, env: &E, key: K) -> Admission {
        if !self.buckets.contains_key(&key) && self.buckets.len() >= self.max_keys {
            self.evict_oldest();
        }

        let now = env.now();
        let (bucket, last_used) = self
            .buckets
            .entry(key)
            .or_insert_with(|| (TokenBucket::new(env, self.rate, self.capacity), now));
        *last_used = now;
        bucket.try_consume(env, 1.0)
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest_key) =
            self.buckets.iter().min_by_key(|(_, (_, last_used))| *last_used).map(|(k, _)| k.clone())
        {
            self.buckets.remove(&oldest_key);
        }
    }

    /// Number of distinct keys currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// True if no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };

    use super::*;

    /// A deterministic environment for limiter tests: `now()` is an offset
    /// from an `Arc<AtomicU64>` of elapsed milliseconds the test advances by
    /// hand.
    #[derive(Clone)]
    struct FakeEnv {
        millis: Arc<AtomicU64>,
    }

    impl FakeEnv {
        fn new() -> Self {
            Self { millis: Arc::new(AtomicU64::new(0)) }
        }

        fn advance(&self, ms: u64) {
            self.millis.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Environment for FakeEnv {
        type Instant = Duration;

        fn now(&self) -> Duration {
            Duration::from_millis(self.millis.load(Ordering::SeqCst))
        }

        async fn sleep(&self, _duration: Duration) {}

        fn wall_clock_millis(&self) -> u64 {
            self.millis.load(Ordering::SeqCst)
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(0);
        }
    }

    #[test]
    fn starts_full_and_admits_a_burst() {
        let env = FakeEnv::new();
        let mut bucket = TokenBucket::new(&env, 10.0, 10.0);
        for _ in 0..10 {
            assert_eq!(bucket.try_consume(&env, 1.0), Admission::Allow);
        }
        assert_eq!(bucket.try_consume(&env, 1.0), Admission::Deny);
    }

    #[test]
    fn refill_is_proportional_to_elapsed_time() {
        let env = FakeEnv::new();
        let mut bucket = TokenBucket::new(&env, 10.0, 10.0);
        for _ in 0..10 {
            bucket.try_consume(&env, 1.0);
        }
        assert_eq!(bucket.try_consume(&env, 1.0), Admission::Deny);

        // Half a second at rate=10/s refills 5 tokens, enough for exactly
        // one more admit but not two.
        env.advance(500);
        assert_eq!(bucket.try_consume(&env, 1.0), Admission::Allow);
        assert!(bucket.tokens() < 10.0);
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let env = FakeEnv::new();
        let mut bucket = TokenBucket::new(&env, 10.0, 10.0);
        env.advance(60_000);
        bucket.try_consume(&env, 0.0);
        assert!(bucket.tokens() <= 10.0);
    }

    #[test]
    fn set_rate_resets_tokens_and_clock() {
        let env = FakeEnv::new();
        let mut bucket = TokenBucket::new(&env, 10.0, 10.0);
        for _ in 0..10 {
            bucket.try_consume(&env, 1.0);
        }
        bucket.set_rate(&env, 50.0);
        assert_eq!(bucket.tokens(), 50.0);
    }

    #[test]
    fn keyed_limiter_tracks_ips_independently() {
        let env = FakeEnv::new();
        let mut limiter: KeyedLimiter<&str, FakeEnv> = KeyedLimiter::new(1.0, 1.0, 16);
        assert_eq!(limiter.try_consume(&env, "10.0.0.1"), Admission::Allow);
        assert_eq!(limiter.try_consume(&env, "10.0.0.1"), Admission::Deny);
        assert_eq!(limiter.try_consume(&env, "10.0.0.2"), Admission::Allow);
    }

    #[test]
    fn keyed_limiter_evicts_least_recently_used_key() {
        let env = FakeEnv::new();
        let mut limiter: KeyedLimiter<&str, FakeEnv> = KeyedLimiter::new(1.0, 1.0, 1);
        limiter.try_consume(&env, "a");
        limiter.try_consume(&env, "b");
        assert_eq!(limiter.len(), 1);
        assert!(!limiter.is_empty());
    }
}
