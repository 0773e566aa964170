//! Process-wide counter registry.
//!
//! Every component increments counters for the events it observes
//! (admission refusals, ledger results, channel drops, ...). Counters
//! are created on first use and read back by tests and the monitoring
//! surface through [`Stats::count`] and [`Stats::snapshot`].

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Component emitting a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatType {
    /// Block processor admission and batches
    BlockProcessor,
    /// Ledger processing results
    Ledger,
    /// Active elections container
    Active,
    /// Elections started, by behavior
    ActiveStarted,
    /// Elections completed, by behavior
    ActiveConfirmed,
    /// Elections dropped before completion, by behavior
    ActiveDropped,
    /// Elections expired unconfirmed, by behavior
    ActiveTimeout,
    /// Individual election events
    Election,
    /// Vote router fan-in
    VoteRouter,
    /// Priority scheduler
    PriorityScheduler,
    /// Scheduler buckets
    Bucket,
    /// Confirming set
    ConfirmingSet,
    /// Unchecked map
    Unchecked,
    /// TCP listener
    TcpListener,
    /// TCP channels
    TcpChannel,
    /// Per-traffic-type channel sends
    TcpChannelSend,
    /// Per-traffic-type channel drops
    TcpChannelDrop,
    /// Channel write errors, by error kind
    TcpChannelError,
    /// Peer map maintenance
    PeerMap,
}

/// Specific counted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum StatDetail {
    // Generic
    Loop,
    Insert,
    Duplicate,
    Erase,
    Notify,
    Trim,

    // Block processor admission
    Overfill,
    BadWork,
    Process,
    Forced,
    ProcessedBatch,

    // Ledger results
    Progress,
    GapPrevious,
    GapSource,
    GapEpochOpenPending,
    Old,
    BadSignature,
    NegativeSpend,
    Unreceivable,
    Fork,
    OpenedBurnAccount,
    BalanceMismatch,
    RepresentativeMismatch,
    BlockPosition,
    InsufficientWork,
    Rollback,
    RollbackFailed,

    // Elections
    ConfirmOnce,
    ConfirmOnceFailed,
    Vote,
    VoteProcessed,
    BroadcastVote,
    BroadcastVoteNormal,
    BroadcastVoteFinal,
    BroadcastBlockInitial,
    BroadcastBlockRepeat,
    ElectionBlockConflict,
    ElectionCleanup,
    Expired,
    Cancelled,
    ActivateSuccess,
    ActivateFailed,
    Activated,
    EvictBlock,

    // Election behaviors
    Manual,
    Priority,
    Hinted,
    Optimistic,

    // Confirming set
    Confirmed,
    AlreadyConfirmed,

    // Unchecked map
    Put,
    Satisfied,

    // TCP listener
    AcceptSuccess,
    AcceptFailure,
    AcceptError,
    Excluded,
    MaxPerIp,
    MaxPerSubnetwork,
    MaxAttempts,
    AttemptInProgress,
    ConnectInitiate,
    ConnectFailure,
    ConnectError,
    EraseDead,
    CloseError,

    // TCP channels
    Queued,
    Drop,
    Send,
    WaitBandwidth,
    Generic,
    BlockBroadcast,
    VoteRebroadcast,
    Bootstrap,
    WriteError,
    Aborted,

    // Peer map
    PurgeIdle,
    PurgeVersion,
}

/// Process-wide atomic counter registry.
#[derive(Default)]
pub struct Stats {
    counters: RwLock<HashMap<(StatType, StatDetail), Arc<AtomicU64>>>,
}

impl Stats {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments a counter by one.
    pub fn inc(&self, stat_type: StatType, detail: StatDetail) {
        self.add(stat_type, detail, 1);
    }

    /// Increments a counter by `value`.
    pub fn add(&self, stat_type: StatType, detail: StatDetail, value: u64) {
        self.counter(stat_type, detail).fetch_add(value, Ordering::Relaxed);
    }

    /// Current value of a counter; zero if it was never incremented.
    pub fn count(&self, stat_type: StatType, detail: StatDetail) -> u64 {
        self.counters
            .read()
            .get(&(stat_type, detail))
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    /// A sorted snapshot of all non-zero counters.
    pub fn snapshot(&self) -> Vec<((StatType, StatDetail), u64)> {
        let mut entries: Vec<_> = self
            .counters
            .read()
            .iter()
            .map(|(key, counter)| (*key, counter.load(Ordering::Relaxed)))
            .filter(|(_, value)| *value > 0)
            .collect();
        entries.sort_by_key(|(key, _)| *key);
        entries
    }

    fn counter(&self, stat_type: StatType, detail: StatDetail) -> Arc<AtomicU64> {
        if let Some(counter) = self.counters.read().get(&(stat_type, detail)) {
            return counter.clone();
        }
        self.counters
            .write()
            .entry((stat_type, detail))
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = Stats::new();
        stats.inc(StatType::Ledger, StatDetail::Fork);
        stats.add(StatType::Ledger, StatDetail::Fork, 2);
        assert_eq!(stats.count(StatType::Ledger, StatDetail::Fork), 3);
        assert_eq!(stats.count(StatType::Ledger, StatDetail::Old), 0);
    }

    #[test]
    fn test_snapshot_skips_zeroes() {
        let stats = Stats::new();
        stats.inc(StatType::Active, StatDetail::Loop);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0], ((StatType::Active, StatDetail::Loop), 1));
    }
}
