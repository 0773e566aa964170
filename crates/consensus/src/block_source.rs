//! Origin categories for block submissions.

/// Where a block submission came from. Drives the fair-queue priority,
/// per-source rate limit and queue capacity of the block processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockSource {
    /// Received live from a peer
    Live,
    /// Received live from the block's originator
    LiveOriginator,
    /// Pulled during bootstrap
    Bootstrap,
    /// Pulled during legacy bootstrap
    BootstrapLegacy,
    /// Released from the unchecked map
    Unchecked,
    /// Submitted by a local client
    Local,
    /// Forced by an election to roll in a fork winner
    Forced,
    /// Re-submitted by an election
    Election,
}

impl BlockSource {
    /// Fair-queue round-robin weight for this source. Local and forced
    /// submissions outweigh everything; bootstrap runs in bulk but
    /// below local traffic; live traffic takes the base weight.
    pub fn priority(&self) -> usize {
        match self {
            BlockSource::Local | BlockSource::Forced => 16,
            BlockSource::Bootstrap | BlockSource::BootstrapLegacy => 8,
            _ => 1,
        }
    }

    /// Fair-queue capacity for this source.
    pub fn max_size(&self) -> usize {
        match self {
            BlockSource::Live | BlockSource::LiveOriginator => 128,
            _ => 16384,
        }
    }

    /// Whether submissions from this source pass the live-traffic rate
    /// limiter on admission.
    pub fn rate_limited(&self) -> bool {
        matches!(self, BlockSource::Live | BlockSource::LiveOriginator)
    }

    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockSource::Live => "live",
            BlockSource::LiveOriginator => "live_originator",
            BlockSource::Bootstrap => "bootstrap",
            BlockSource::BootstrapLegacy => "bootstrap_legacy",
            BlockSource::Unchecked => "unchecked",
            BlockSource::Local => "local",
            BlockSource::Forced => "forced",
            BlockSource::Election => "election",
        }
    }
}

impl std::fmt::Display for BlockSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table() {
        assert_eq!(BlockSource::Live.priority(), 1);
        assert_eq!(BlockSource::Local.priority(), 16);
        assert_eq!(BlockSource::Forced.priority(), 16);
        assert_eq!(BlockSource::Bootstrap.priority(), 8);
        assert_eq!(BlockSource::Live.max_size(), 128);
        assert_eq!(BlockSource::Local.max_size(), 16384);
        assert!(BlockSource::Live.rate_limited());
        assert!(!BlockSource::Forced.rate_limited());
    }
}
