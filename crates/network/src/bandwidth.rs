//! Shared outbound bandwidth limiting.
//!
//! One limiter instance is shared by all channels. Bootstrap traffic is
//! charged to its own bucket so bulk pulls cannot crowd out realtime
//! messages.

use crate::TrafficType;
use lattix_core::RateLimiter;

/// Parameters for the shared outbound limiter.
#[derive(Debug, Clone)]
pub struct OutboundLimiterConfig {
    /// Bytes per second for realtime traffic; 0 is unlimited
    pub standard_limit: u64,
    /// Burst ratio for realtime traffic
    pub standard_burst_ratio: f64,
    /// Bytes per second for bootstrap traffic; 0 is unlimited
    pub bootstrap_limit: u64,
    /// Burst ratio for bootstrap traffic
    pub bootstrap_burst_ratio: f64,
}

impl Default for OutboundLimiterConfig {
    fn default() -> Self {
        Self {
            standard_limit: 10 * 1024 * 1024,
            standard_burst_ratio: 3.0,
            bootstrap_limit: 5 * 1024 * 1024,
            bootstrap_burst_ratio: 1.0,
        }
    }
}

/// Egress token buckets shared across channels.
pub struct OutboundLimiter {
    standard: RateLimiter,
    bootstrap: RateLimiter,
}

impl OutboundLimiter {
    /// Creates a limiter from its configuration.
    pub fn new(config: OutboundLimiterConfig) -> Self {
        Self {
            standard: RateLimiter::new(config.standard_limit, config.standard_burst_ratio),
            bootstrap: RateLimiter::new(config.bootstrap_limit, config.bootstrap_burst_ratio),
        }
    }

    /// Whether `size` bytes of the given traffic type may pass,
    /// consuming the budget if so.
    pub fn should_pass(&self, size: u64, traffic_type: TrafficType) -> bool {
        self.select(traffic_type).should_pass(size)
    }

    /// Replaces the limits at runtime.
    pub fn reset(&self, config: &OutboundLimiterConfig) {
        self.standard
            .reset(config.standard_limit, config.standard_burst_ratio);
        self.bootstrap
            .reset(config.bootstrap_limit, config.bootstrap_burst_ratio);
    }

    fn select(&self, traffic_type: TrafficType) -> &RateLimiter {
        match traffic_type {
            TrafficType::Bootstrap => &self.bootstrap,
            _ => &self.standard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_charged_separately() {
        let limiter = OutboundLimiter::new(OutboundLimiterConfig {
            standard_limit: 100,
            standard_burst_ratio: 1.0,
            bootstrap_limit: 100,
            bootstrap_burst_ratio: 1.0,
        });
        assert!(limiter.should_pass(100, TrafficType::Generic));
        // The realtime bucket is drained, bootstrap still passes
        assert!(!limiter.should_pass(100, TrafficType::BlockBroadcast));
        assert!(limiter.should_pass(100, TrafficType::Bootstrap));
    }

    #[test]
    fn test_unlimited_by_default_zero() {
        let limiter = OutboundLimiter::new(OutboundLimiterConfig {
            standard_limit: 0,
            standard_burst_ratio: 1.0,
            bootstrap_limit: 0,
            bootstrap_burst_ratio: 1.0,
        });
        for _ in 0..100 {
            assert!(limiter.should_pass(1 << 20, TrafficType::Generic));
        }
    }
}
