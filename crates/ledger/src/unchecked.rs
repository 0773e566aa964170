//! Parked blocks waiting for a dependency.
//!
//! Blocks that arrive before their previous or source block are parked
//! here keyed by the missing dependency. When the dependency is later
//! processed, `trigger` releases the parked blocks through the
//! `satisfied` observers, which feed them back into the block
//! processor. Inserts and queries are buffered and handled by one
//! worker thread so callers never block on the map.

use lattix_core::{ContainerInfo, ObserverSet, StatDetail, StatType, Stats};
use lattix_types::{Block, BlockHash, HashOrAccount};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

/// Bound on parked blocks before the oldest are evicted.
const MAX_ENTRIES: usize = 65536;

enum Op {
    Insert(HashOrAccount, Arc<Block>),
    Query(HashOrAccount),
}

#[derive(Default)]
struct Buffer {
    ops: VecDeque<Op>,
    stopped: bool,
}

#[derive(Default)]
struct Entries {
    /// Parked blocks by missing dependency
    by_dependency: HashMap<HashOrAccount, Vec<Arc<Block>>>,
    /// Insertion order for eviction
    order: VecDeque<(HashOrAccount, BlockHash)>,
    total: usize,
}

/// Buffered map of blocks parked on a missing dependency.
pub struct UncheckedMap {
    buffer: Mutex<Buffer>,
    condition: Condvar,
    entries: Mutex<Entries>,
    stats: Arc<Stats>,
    thread: Mutex<Option<JoinHandle<()>>>,

    /// Fired for each parked block whose dependency arrived.
    pub satisfied: ObserverSet<Arc<Block>>,
}

impl UncheckedMap {
    /// Creates a stopped map; call [`UncheckedMap::start`] to spawn the
    /// worker.
    pub fn new(stats: Arc<Stats>) -> Arc<Self> {
        Arc::new(Self {
            buffer: Mutex::new(Buffer::default()),
            condition: Condvar::new(),
            entries: Mutex::new(Entries::default()),
            stats,
            thread: Mutex::new(None),
            satisfied: ObserverSet::new(),
        })
    }

    /// Spawns the worker thread.
    pub fn start(self: &Arc<Self>) {
        let mut thread = self.thread.lock();
        debug_assert!(thread.is_none());
        let this = self.clone();
        *thread = Some(
            std::thread::Builder::new()
                .name("unchecked".into())
                .spawn(move || this.run())
                .expect("spawning unchecked worker"),
        );
    }

    /// Stops the worker and joins it. Buffered operations are dropped.
    pub fn stop(&self) {
        {
            let mut buffer = self.buffer.lock();
            buffer.stopped = true;
        }
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Parks a block under the dependency it is missing.
    pub fn put(&self, dependency: HashOrAccount, block: Arc<Block>) {
        let mut buffer = self.buffer.lock();
        buffer.ops.push_back(Op::Insert(dependency, block));
        drop(buffer);
        self.condition.notify_all();
        self.stats.inc(StatType::Unchecked, StatDetail::Put);
    }

    /// Requests release of all blocks parked under a dependency.
    pub fn trigger(&self, dependency: HashOrAccount) {
        let mut buffer = self.buffer.lock();
        buffer.ops.push_back(Op::Query(dependency));
        drop(buffer);
        self.condition.notify_all();
    }

    /// Number of parked blocks.
    pub fn len(&self) -> usize {
        self.entries.lock().total
    }

    /// True when nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the worker has drained its buffer.
    pub fn idle(&self) -> bool {
        self.buffer.lock().ops.is_empty()
    }

    /// Container size introspection.
    pub fn container_info(&self) -> ContainerInfo {
        let entries = self.entries.lock();
        let buffered = self.buffer.lock().ops.len();
        ContainerInfo::default()
            .leaf("entries", entries.total, std::mem::size_of::<Arc<Block>>())
            .leaf("buffer", buffered, std::mem::size_of::<Arc<Block>>())
    }

    fn run(&self) {
        loop {
            let op = {
                let mut buffer = self.buffer.lock();
                while buffer.ops.is_empty() && !buffer.stopped {
                    self.condition.wait(&mut buffer);
                }
                if buffer.stopped {
                    return;
                }
                buffer.ops.pop_front()
            };
            match op {
                Some(Op::Insert(dependency, block)) => self.insert_impl(dependency, block),
                Some(Op::Query(dependency)) => self.query_impl(dependency),
                None => {}
            }
        }
    }

    fn insert_impl(&self, dependency: HashOrAccount, block: Arc<Block>) {
        let mut entries = self.entries.lock();
        let hash = block.hash();
        let bucket = entries.by_dependency.entry(dependency).or_default();
        if bucket.iter().any(|existing| existing.hash() == hash) {
            return;
        }
        bucket.push(block);
        entries.order.push_back((dependency, hash));
        entries.total += 1;

        while entries.total > MAX_ENTRIES {
            let Some((old_dependency, old_hash)) = entries.order.pop_front() else {
                break;
            };
            let (removed, now_empty) = match entries.by_dependency.get_mut(&old_dependency) {
                Some(bucket) => {
                    let before = bucket.len();
                    bucket.retain(|block| block.hash() != old_hash);
                    (before - bucket.len(), bucket.is_empty())
                }
                None => (0, false),
            };
            entries.total -= removed;
            if now_empty {
                entries.by_dependency.remove(&old_dependency);
            }
        }
    }

    fn query_impl(&self, dependency: HashOrAccount) {
        let released = {
            let mut entries = self.entries.lock();
            let Some(bucket) = entries.by_dependency.remove(&dependency) else {
                return;
            };
            entries.total -= bucket.len();
            entries
                .order
                .retain(|(parked_dependency, _)| *parked_dependency != dependency);
            bucket
        };
        debug!(count = released.len(), %dependency, "dependency satisfied");
        for block in released {
            self.stats.inc(StatType::Unchecked, StatDetail::Satisfied);
            self.satisfied.notify(&block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattix_types::{Account, Amount};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn test_block(fill: u8) -> Arc<Block> {
        Arc::new(Block::open(
            Account::from([fill; 32]),
            Account::from([fill; 32]),
            Amount::raw(1),
            BlockHash::from([fill; 32]),
        ))
    }

    fn wait_until(predicate: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !predicate() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_put_then_trigger_releases() {
        let map = UncheckedMap::new(Arc::new(Stats::new()));
        map.start();

        let released = Arc::new(AtomicUsize::new(0));
        let released_clone = released.clone();
        map.satisfied.add(move |_| {
            released_clone.fetch_add(1, Ordering::SeqCst);
        });

        let dependency = HashOrAccount::from(BlockHash::from([9u8; 32]));
        map.put(dependency, test_block(1));
        map.put(dependency, test_block(2));
        wait_until(|| map.len() == 2);

        map.trigger(dependency);
        wait_until(|| released.load(Ordering::SeqCst) == 2);
        assert!(map.is_empty());
        map.stop();
    }

    #[test]
    fn test_duplicate_put_ignored() {
        let map = UncheckedMap::new(Arc::new(Stats::new()));
        map.start();
        let dependency = HashOrAccount::from(BlockHash::from([9u8; 32]));
        let block = test_block(1);
        map.put(dependency, block.clone());
        map.put(dependency, block);
        wait_until(|| map.idle());
        assert_eq!(map.len(), 1);
        map.stop();
    }

    #[test]
    fn test_trigger_unknown_dependency_is_noop() {
        let map = UncheckedMap::new(Arc::new(Stats::new()));
        map.start();
        map.trigger(HashOrAccount::from(BlockHash::from([1u8; 32])));
        wait_until(|| map.idle());
        assert!(map.is_empty());
        map.stop();
    }
}
