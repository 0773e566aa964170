//! Traffic classification for outgoing bytes.

use lattix_core::StatDetail;

/// Classification of outgoing bytes on a channel. Drives the
/// per-channel queueing priority and which bandwidth bucket the bytes
/// are charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrafficType {
    /// Everything without a more specific class
    Generic,
    /// Flooding the current election winner
    BlockBroadcast,
    /// Re-broadcasting observed votes
    VoteRebroadcast,
    /// Bulk ledger pulls
    Bootstrap,
}

impl TrafficType {
    /// All traffic types, in queue iteration order.
    pub const ALL: [TrafficType; 4] = [
        TrafficType::Generic,
        TrafficType::BlockBroadcast,
        TrafficType::VoteRebroadcast,
        TrafficType::Bootstrap,
    ];

    /// Round-robin weight of this traffic type in the channel queue.
    /// Broadcast-style traffic yields to everything else.
    pub fn priority(&self) -> usize {
        match self {
            TrafficType::BlockBroadcast | TrafficType::VoteRebroadcast => 1,
            _ => 4,
        }
    }

    /// Counter detail for per-type stats.
    pub fn stat_detail(&self) -> StatDetail {
        match self {
            TrafficType::Generic => StatDetail::Generic,
            TrafficType::BlockBroadcast => StatDetail::BlockBroadcast,
            TrafficType::VoteRebroadcast => StatDetail::VoteRebroadcast,
            TrafficType::Bootstrap => StatDetail::Bootstrap,
        }
    }
}

impl std::fmt::Display for TrafficType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrafficType::Generic => "generic",
            TrafficType::BlockBroadcast => "block_broadcast",
            TrafficType::VoteRebroadcast => "vote_rebroadcast",
            TrafficType::Bootstrap => "bootstrap",
        };
        f.write_str(name)
    }
}
