//! One balance tier of the priority scheduler.
//!
//! A bucket holds blocks ordered by their priority time (lower is
//! better) and tracks the elections it has started, so overfilling can
//! be resolved by cancelling its own worst election. Buckets hold only
//! weak references to elections; the active container owns them and
//! calls back here when one is erased.

use crate::active::{ActiveElections, InsertResult};
use crate::election::{Election, ElectionBehavior};
use lattix_core::{ContainerInfo, StatDetail, StatType, Stats};
use lattix_types::{Amount, Block, BlockHash, QualifiedRoot};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tracing::trace;

/// Per-bucket limits.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    /// Queue cap; pushing beyond it evicts the worst entry
    pub max_blocks: usize,
    /// Elections this bucket may start regardless of global vacancy
    pub reserved_elections: usize,
    /// Soft cap of elections per bucket
    pub max_elections: usize,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            max_blocks: 4096,
            reserved_elections: 100,
            max_elections: 150,
        }
    }
}

struct ElectionSlot {
    election: Weak<Election>,
    priority: u64,
}

#[derive(Default)]
struct BucketData {
    /// Blocks awaiting activation, keyed by (priority_time, hash)
    queue: BTreeMap<(u64, BlockHash), Arc<Block>>,
    /// Elections started from this bucket
    elections: HashMap<QualifiedRoot, ElectionSlot>,
}

/// An ordered set of blocks to be scheduled, one per balance tier.
pub struct Bucket {
    index: u64,
    min_balance: Amount,
    config: BucketConfig,
    active: Weak<ActiveElections>,
    stats: Arc<Stats>,
    data: Mutex<BucketData>,
}

impl Bucket {
    /// Creates a bucket for balances at or above `min_balance`.
    pub fn new(
        index: u64,
        min_balance: Amount,
        config: BucketConfig,
        active: &Arc<ActiveElections>,
        stats: Arc<Stats>,
    ) -> Arc<Self> {
        Arc::new(Self {
            index,
            min_balance,
            config,
            active: Arc::downgrade(active),
            stats,
            data: Mutex::new(BucketData::default()),
        })
    }

    /// Bucket index within the scheduler.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Lowest balance this bucket covers.
    pub fn min_balance(&self) -> Amount {
        self.min_balance
    }

    /// Queues a block with its priority time. Over capacity, the entry
    /// with the worst (highest) priority time is evicted.
    pub fn push(&self, priority_time: u64, block: Arc<Block>) {
        let mut data = self.data.lock();
        data.queue.insert((priority_time, block.hash()), block);
        if data.queue.len() > self.config.max_blocks {
            let worst = data.queue.keys().next_back().copied();
            if let Some(worst) = worst {
                data.queue.remove(&worst);
                self.stats.inc(StatType::Bucket, StatDetail::EvictBlock);
            }
        }
    }

    /// Whether the bucket has a block that could be activated now.
    pub fn available(&self) -> bool {
        let data = self.data.lock();
        match data.queue.keys().next() {
            Some((priority_time, _)) => self.election_vacancy(&data, *priority_time),
            None => false,
        }
    }

    /// Pops the best queued block and starts an election for it.
    /// Returns whether an election was started.
    pub fn activate(self: &Arc<Self>) -> bool {
        let Some(active) = self.active.upgrade() else {
            return false;
        };
        let (block, priority) = {
            let mut data = self.data.lock();
            let Some(key) = data.queue.keys().next().copied() else {
                return false;
            };
            let block = data.queue.remove(&key).expect("key just observed");
            (block, key.0)
        };

        // The erase callback runs when the active container drops the
        // election, releasing this bucket's slot
        let bucket = Arc::downgrade(self);
        let erase_callback = Box::new(move |election: &Arc<Election>| {
            if let Some(bucket) = bucket.upgrade() {
                bucket.data.lock().elections.remove(&election.qualified_root());
            }
        });

        let InsertResult { election, inserted } = active.insert(
            &block,
            ElectionBehavior::Priority,
            self.index,
            priority,
            Some(erase_callback),
        );
        if inserted {
            let election = election.expect("inserted elections are returned");
            self.data.lock().elections.insert(
                election.qualified_root(),
                ElectionSlot {
                    election: Arc::downgrade(&election),
                    priority,
                },
            );
            self.stats.inc(StatType::Bucket, StatDetail::ActivateSuccess);
            trace!(bucket = self.index, priority, "activated block");
        } else {
            self.stats.inc(StatType::Bucket, StatDetail::ActivateFailed);
        }
        inserted
    }

    /// Cancels this bucket's worst elections while it is overfilled.
    pub fn update(&self) {
        loop {
            let victim = {
                let data = self.data.lock();
                if !self.election_overfill(&data) {
                    break;
                }
                Self::worst_election(&data)
            };
            match victim {
                Some(election) => election.cancel(),
                None => break,
            }
        }
    }

    /// Queued block count.
    pub fn len(&self) -> usize {
        self.data.lock().queue.len()
    }

    /// True when no blocks are queued.
    pub fn is_empty(&self) -> bool {
        self.data.lock().queue.is_empty()
    }

    /// Elections currently tracked by this bucket.
    pub fn election_count(&self) -> usize {
        self.data.lock().elections.len()
    }

    /// Whether a block hash is currently queued.
    pub fn contains(&self, priority_time: u64, hash: &BlockHash) -> bool {
        self.data.lock().queue.contains_key(&(priority_time, *hash))
    }

    /// Container size introspection.
    pub fn container_info(&self) -> ContainerInfo {
        let data = self.data.lock();
        ContainerInfo::default()
            .leaf("queue", data.queue.len(), std::mem::size_of::<Arc<Block>>())
            .leaf(
                "elections",
                data.elections.len(),
                std::mem::size_of::<ElectionSlot>(),
            )
    }

    /// Whether an election with the given priority could start now:
    /// within the reserved allowance, within the soft cap when global
    /// slots are free, or displacing when it beats the current worst.
    fn election_vacancy(&self, data: &BucketData, candidate_priority: u64) -> bool {
        let Some(active) = self.active.upgrade() else {
            return false;
        };
        if data.elections.len() < self.config.reserved_elections {
            return true;
        }
        if data.elections.len() < self.config.max_elections {
            return active.vacancy(ElectionBehavior::Priority) > 0;
        }
        if let Some(lowest) = data.elections.values().map(|slot| slot.priority).max() {
            // Compare equal to drain duplicates; reprioritizations are
            // bounded at twice the cap
            if candidate_priority <= lowest {
                return data.elections.len() < self.config.max_elections * 2;
            }
        }
        false
    }

    fn election_overfill(&self, data: &BucketData) -> bool {
        let Some(active) = self.active.upgrade() else {
            return false;
        };
        if data.elections.len() < self.config.reserved_elections {
            return false;
        }
        if data.elections.len() < self.config.max_elections {
            return active.vacancy(ElectionBehavior::Priority) < 0;
        }
        true
    }

    /// The live, not yet cancelled election with the worst priority.
    fn worst_election(data: &BucketData) -> Option<Arc<Election>> {
        data.elections
            .values()
            .filter_map(|slot| slot.election.upgrade().map(|election| (slot.priority, election)))
            .filter(|(_, election)| election.state() != crate::ElectionState::Cancelled)
            .max_by_key(|(priority, _)| *priority)
            .map(|(_, election)| election)
    }
}
