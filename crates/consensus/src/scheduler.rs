//! Balance-tiered admission of blocks into elections.
//!
//! [`Bucketing`] maps an account balance to a bucket index over fixed
//! balance regions. The [`PriorityScheduler`] owns one [`Bucket`] per
//! tier and a worker thread that activates the best available block
//! whenever election slots open up.

use crate::active::ActiveElections;
use crate::bucket::{Bucket, BucketConfig};
use lattix_core::{ContainerInfo, StatDetail, StatType, Stats};
use lattix_ledger::{Ledger, Transaction};
use lattix_types::{Account, Amount};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, trace};

/// Maps balances to bucket indices over fixed regions.
///
/// One bucket at zero, doubling-width regions through the high balance
/// range, and one top bucket, so accounts of very different sizes never
/// compete for the same election slots.
pub struct Bucketing {
    minimums: Vec<Amount>,
}

impl Bucketing {
    /// Builds the standard region layout.
    pub fn new() -> Self {
        let mut minimums: Vec<u128> = Vec::new();

        minimums.push(0);

        let mut build_region = |begin: u128, end: u128, count: u32| {
            let width = (end - begin) / count as u128;
            for index in 0..count {
                minimums.push(begin + index as u128 * width);
            }
        };

        build_region(1u128 << 79, 1u128 << 88, 1);
        build_region(1u128 << 88, 1u128 << 92, 2);
        build_region(1u128 << 92, 1u128 << 96, 4);
        build_region(1u128 << 96, 1u128 << 100, 8);
        build_region(1u128 << 100, 1u128 << 104, 16);
        build_region(1u128 << 104, 1u128 << 108, 16);
        build_region(1u128 << 108, 1u128 << 112, 8);
        build_region(1u128 << 112, 1u128 << 116, 4);
        build_region(1u128 << 116, 1u128 << 120, 2);
        minimums.push(1u128 << 120);

        Self {
            minimums: minimums.into_iter().map(Amount::raw).collect(),
        }
    }

    /// The bucket index covering a balance.
    pub fn bucket_index(&self, balance: Amount) -> u64 {
        debug_assert!(!self.minimums.is_empty());
        let position = self
            .minimums
            .partition_point(|minimum| *minimum <= balance);
        // There is always a bucket with a minimum balance of zero
        debug_assert!(position > 0);
        (position - 1) as u64
    }

    /// The per-bucket minimum balances.
    pub fn minimums(&self) -> &[Amount] {
        &self.minimums
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.minimums.len()
    }

    /// Bucketings are never empty.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for Bucketing {
    fn default() -> Self {
        Self::new()
    }
}

/// Priority scheduler tuning.
#[derive(Debug, Clone)]
pub struct PrioritySchedulerConfig {
    /// Whether the scheduler thread runs
    pub enabled: bool,
    /// Per-bucket limits
    pub bucket: BucketConfig,
}

impl Default for PrioritySchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket: BucketConfig::default(),
        }
    }
}

/// Activates the first unconfirmed block of prioritised accounts.
pub struct PriorityScheduler {
    config: PrioritySchedulerConfig,
    ledger: Arc<Ledger>,
    stats: Arc<Stats>,
    bucketing: Bucketing,
    buckets: Vec<Arc<Bucket>>,
    mutex: Mutex<bool>,
    condition: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PriorityScheduler {
    /// Creates the scheduler and its buckets.
    pub fn new(
        config: PrioritySchedulerConfig,
        ledger: Arc<Ledger>,
        active: &Arc<ActiveElections>,
        stats: Arc<Stats>,
    ) -> Arc<Self> {
        let bucketing = Bucketing::new();
        info!(
            buckets = bucketing.len(),
            blocks_per_bucket = config.bucket.max_blocks,
            "priority scheduler buckets"
        );
        let buckets = bucketing
            .minimums()
            .iter()
            .enumerate()
            .map(|(index, minimum)| {
                Bucket::new(
                    index as u64,
                    *minimum,
                    config.bucket.clone(),
                    active,
                    stats.clone(),
                )
            })
            .collect();

        let this = Arc::new(Self {
            config,
            ledger,
            stats,
            bucketing,
            buckets,
            mutex: Mutex::new(false),
            condition: Condvar::new(),
            thread: Mutex::new(None),
        });

        // Wake the scheduler whenever election slots may have opened
        let notify = Arc::downgrade(&this);
        active.vacancy_updated.add(move |()| {
            if let Some(scheduler) = notify.upgrade() {
                scheduler.notify();
            }
        });
        this
    }

    /// Spawns the scheduler thread.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }
        let mut thread = self.thread.lock();
        debug_assert!(thread.is_none());
        let this = self.clone();
        *thread = Some(
            std::thread::Builder::new()
                .name("sched_priority".into())
                .spawn(move || this.run())
                .expect("spawning priority scheduler"),
        );
    }

    /// Stops and joins the scheduler thread.
    pub fn stop(&self) {
        {
            let mut stopped = self.mutex.lock();
            *stopped = true;
        }
        self.condition.notify_all();
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }

    /// Queues the first unconfirmed block of an account for election,
    /// if its dependencies are confirmed. Returns whether a block was
    /// queued.
    pub fn activate(&self, tx: &dyn Transaction, account: &Account) -> bool {
        debug_assert!(!account.is_zero());
        let Some(block) = self.ledger.next_unconfirmed(tx, account) else {
            return false;
        };
        if !self.ledger.dependents_confirmed(tx, &block) {
            return false;
        }
        let sideband = block
            .sideband()
            .expect("ledger blocks carry sidebands");
        let balance_priority = sideband.balance;
        // The confirmed frontier timestamp orders accounts; fresh
        // accounts queue at the current time, the lowest priority
        let confirmed = self.ledger.confirmation_height(tx, account);
        let time_priority = if confirmed.height > 0 {
            self.ledger
                .block_get(tx, &confirmed.frontier)
                .and_then(|frontier| frontier.sideband().map(|sideband| sideband.timestamp))
                .unwrap_or(sideband.timestamp)
        } else {
            sideband.timestamp
        };

        self.stats
            .inc(StatType::PriorityScheduler, StatDetail::Activated);
        trace!(
            %account,
            block = %block.hash(),
            time = time_priority,
            priority = %balance_priority,
            "activated block"
        );

        self.bucket_for(balance_priority).push(time_priority, block);
        self.notify();
        true
    }

    /// Wakes the scheduler thread.
    pub fn notify(&self) {
        self.condition.notify_all();
    }

    /// Total queued blocks across buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.len()).sum()
    }

    /// True when every bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|bucket| bucket.is_empty())
    }

    /// The bucket covering a balance.
    pub fn bucket_for(&self, balance: Amount) -> &Arc<Bucket> {
        &self.buckets[self.bucketing.bucket_index(balance) as usize]
    }

    /// All buckets, for tests and introspection.
    pub fn buckets(&self) -> &[Arc<Bucket>] {
        &self.buckets
    }

    /// Container size introspection.
    pub fn container_info(&self) -> ContainerInfo {
        let mut blocks = ContainerInfo::default();
        for bucket in &self.buckets {
            blocks = blocks.leaf(
                bucket.index().to_string(),
                bucket.len(),
                std::mem::size_of::<Arc<lattix_types::Block>>(),
            );
        }
        ContainerInfo::default().node("blocks", blocks)
    }

    fn run(&self) {
        loop {
            {
                let mut stopped = self.mutex.lock();
                if *stopped {
                    return;
                }
                if !self.predicate() {
                    let _ = self.condition
                        .wait_for(&mut stopped, Duration::from_millis(100));
                }
                if *stopped {
                    return;
                }
            }
            if self.predicate() {
                self.stats.inc(StatType::PriorityScheduler, StatDetail::Loop);
                for bucket in &self.buckets {
                    if bucket.available() {
                        bucket.activate();
                    }
                    bucket.update();
                }
            }
        }
    }

    fn predicate(&self) -> bool {
        self.buckets.iter().any(|bucket| bucket.available())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucketing_layout() {
        let bucketing = Bucketing::new();
        assert_eq!(bucketing.len(), 63);
        assert_eq!(bucketing.bucket_index(Amount::ZERO), 0);
        assert_eq!(bucketing.bucket_index(Amount::raw(1)), 0);
        // The top bucket catches everything at or above 2^120
        assert_eq!(
            bucketing.bucket_index(Amount::raw(1u128 << 126)),
            (bucketing.len() - 1) as u64
        );
    }

    #[test]
    fn test_bucketing_monotonic() {
        let bucketing = Bucketing::new();
        let mut last = 0;
        for exponent in 79..=126 {
            let index = bucketing.bucket_index(Amount::raw(1u128 << exponent));
            assert!(index >= last);
            last = index;
        }
    }
}
