//! Token-bucket rate limiting.
//!
//! Used for shaping egress traffic and policing ingress admission. A
//! token can represent bytes, messages, or the cost of an operation.
//! Tokens refill at a steady rate and the bucket capacity limits bursts.

use parking_lot::Mutex;
use std::time::Instant;

/// Sentinel refill rate treated as unlimited. A limit of 0 maps to this
/// so "unlimited" still tracks the largest observed burst.
const UNLIMITED_RATE_SENTINEL: u64 = 1_000_000_000;

/// Token-bucket rate limiter state. Not internally synchronised; see
/// [`RateLimiter`] for the shared wrapper.
#[derive(Debug)]
pub struct TokenBucket {
    max_token_count: u64,
    refill_rate: u64,
    current_size: u64,
    /// Smallest observed size, from which the largest burst is derived
    smallest_size: u64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a bucket holding at most `max_token_count` tokens,
    /// refilled at `refill_rate` tokens per second. Zero for either
    /// parameter means unlimited.
    pub fn new(max_token_count: u64, refill_rate: u64) -> Self {
        let mut bucket = Self {
            max_token_count: 0,
            refill_rate: 0,
            current_size: 0,
            smallest_size: 0,
            last_refill: Instant::now(),
        };
        bucket.reset(max_token_count, refill_rate);
        bucket
    }

    /// Attempts to consume `tokens_required` tokens. Returns whether the
    /// operation is allowed. Unlimited buckets always allow.
    pub fn try_consume(&mut self, tokens_required: u64) -> bool {
        self.refill();
        let possible = self.current_size >= tokens_required;
        if possible {
            self.current_size -= tokens_required;
        }
        self.smallest_size = self.smallest_size.min(self.current_size);
        possible || self.refill_rate == UNLIMITED_RATE_SENTINEL
    }

    /// The largest burst observed since the last reset.
    pub fn largest_burst(&self) -> u64 {
        self.max_token_count - self.smallest_size
    }

    /// Current token count.
    pub fn size(&self) -> u64 {
        self.current_size
    }

    /// Replaces the bucket parameters and refills to capacity.
    pub fn reset(&mut self, mut max_token_count: u64, mut refill_rate: u64) {
        if max_token_count == 0 || refill_rate == 0 {
            max_token_count = UNLIMITED_RATE_SENTINEL;
            refill_rate = UNLIMITED_RATE_SENTINEL;
        }
        self.max_token_count = max_token_count;
        self.smallest_size = max_token_count;
        self.current_size = max_token_count;
        self.refill_rate = refill_rate;
        self.last_refill = Instant::now();
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed();
        let tokens_to_add = (elapsed.as_secs_f64() * self.refill_rate as f64) as u64;
        if tokens_to_add > 0 {
            self.current_size = (self.current_size + tokens_to_add).min(self.max_token_count);
            self.last_refill = Instant::now();
        }
    }
}

/// Thread-safe token-bucket limiter sized by a long-term limit and a
/// burst ratio.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    /// Creates a limiter allowing `limit` tokens per second with bursts
    /// up to `limit * burst_ratio`. A limit of 0 is unlimited.
    pub fn new(limit: u64, burst_ratio: f64) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new((limit as f64 * burst_ratio) as u64, limit)),
        }
    }

    /// Whether an operation of the given size may pass, consuming the
    /// tokens if so.
    pub fn should_pass(&self, size: u64) -> bool {
        self.bucket.lock().try_consume(size)
    }

    /// Replaces the limiter parameters.
    pub fn reset(&self, limit: u64, burst_ratio: f64) {
        self.bucket
            .lock()
            .reset((limit as f64 * burst_ratio) as u64, limit);
    }

    /// Current token count.
    pub fn size(&self) -> u64 {
        self.bucket.lock().size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_bucket_basic_consume() {
        let mut bucket = TokenBucket::new(10, 10);
        assert!(bucket.try_consume(10));
        assert!(!bucket.try_consume(10));
    }

    #[test]
    fn test_bucket_refill() {
        let mut bucket = TokenBucket::new(10, 1000);
        assert!(bucket.try_consume(10));
        sleep(Duration::from_millis(50));
        // Refilled ~50 tokens, capped at capacity
        assert!(bucket.try_consume(10));
    }

    #[test]
    fn test_unlimited_sentinel() {
        let mut bucket = TokenBucket::new(0, 0);
        // An unlimited bucket never refuses
        for _ in 0..1000 {
            assert!(bucket.try_consume(1_000_000));
        }
    }

    #[test]
    fn test_largest_burst_tracked() {
        let mut bucket = TokenBucket::new(100, 1);
        assert!(bucket.try_consume(60));
        assert!(bucket.try_consume(20));
        assert_eq!(bucket.largest_burst(), 80);
    }

    #[test]
    fn test_limiter_should_pass() {
        let limiter = RateLimiter::new(100, 2.0);
        assert!(limiter.should_pass(200));
        assert!(!limiter.should_pass(200));
    }
}
