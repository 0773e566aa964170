//! Batched, fair-queued block processor.
//!
//! Blocks from every source funnel through one weighted fair queue into
//! a single processing thread. Each batch runs under the process-batch
//! write slot and one write transaction; results fan out per block and
//! per batch after the transaction commits. Forced submissions roll
//! back whatever competitor currently occupies their root.

use crate::block_context::BlockContext;
use crate::block_source::BlockSource;
use lattix_core::{
    ContainerInfo, FairQueue, ObserverSet, QueueSource, RateLimiter, StatDetail, StatType, Stats,
};
use lattix_ledger::{
    BlockStatus, Ledger, Table, UncheckedMap, WriteQueue, WriteTransaction, Writer,
};
use lattix_network::TcpChannel;
use lattix_types::{Block, Epoch, HashOrAccount, QualifiedRoot};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Block processor tuning.
#[derive(Debug, Clone)]
pub struct BlockProcessorConfig {
    /// Total queued blocks beyond which `full()` reports backpressure
    pub full_size: usize,
    /// Blocks per write transaction
    pub batch_size: usize,
    /// Wall-clock bound per batch
    pub batch_max_time: Duration,
    /// Deadline for `add_blocking` submissions
    pub block_process_timeout: Duration,
    /// Token budget per second for live-source admission
    pub live_rate_limit: u64,
    /// Burst ratio for live-source admission
    pub live_burst_ratio: f64,
}

impl Default for BlockProcessorConfig {
    fn default() -> Self {
        Self {
            full_size: 65536,
            batch_size: 256,
            batch_max_time: Duration::from_millis(500),
            block_process_timeout: Duration::from_secs(300),
            live_rate_limit: 100,
            live_burst_ratio: 3.0,
        }
    }
}

/// A channel reference usable as part of a fair-queue key. Ordering and
/// equality go through the stable channel id; liveness follows the
/// channel itself.
#[derive(Clone)]
struct ChannelRef {
    id: u64,
    channel: Weak<TcpChannel>,
}

impl PartialEq for ChannelRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ChannelRef {}

impl PartialOrd for ChannelRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChannelRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

/// Fair-queue source key: the block source plus the originating
/// channel, when there is one. Keys die with their channel.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceKey {
    source: BlockSource,
    channel: Option<ChannelRef>,
}

impl SourceKey {
    fn new(source: BlockSource, channel: Option<&Arc<TcpChannel>>) -> Self {
        Self {
            source,
            channel: channel.map(|channel| ChannelRef {
                id: channel.id(),
                channel: Arc::downgrade(channel),
            }),
        }
    }

    /// The block source of this key.
    pub fn source(&self) -> BlockSource {
        self.source
    }
}

impl QueueSource for SourceKey {
    fn alive(&self) -> bool {
        match &self.channel {
            // Sources without a channel, e.g. local RPC, never expire
            None => true,
            Some(reference) => reference
                .channel
                .upgrade()
                .is_some_and(|channel| channel.alive()),
        }
    }
}

struct ProcessorState {
    queue: FairQueue<Arc<BlockContext>, SourceKey>,
    stopped: bool,
}

/// Batched, deadline-bounded block processor.
pub struct BlockProcessor {
    config: BlockProcessorConfig,
    ledger: Arc<Ledger>,
    unchecked: Arc<UncheckedMap>,
    write_queue: Arc<WriteQueue>,
    stats: Arc<Stats>,
    state: Mutex<ProcessorState>,
    condition: Condvar,
    live_limiter: RateLimiter,
    thread: Mutex<Option<JoinHandle<()>>>,

    /// Fired per processed block, outside the queue mutex.
    pub block_processed: ObserverSet<(BlockStatus, Arc<BlockContext>)>,
    /// Fired once per batch with every result in processing order.
    pub batch_processed: ObserverSet<Vec<(BlockStatus, Arc<BlockContext>)>>,
    /// Fired for every block removed by a forced rollback, with the
    /// qualified root whose force initiated it.
    pub rolled_back: ObserverSet<(Arc<Block>, QualifiedRoot)>,
}

impl BlockProcessor {
    /// Creates a stopped processor.
    pub fn new(
        config: BlockProcessorConfig,
        ledger: Arc<Ledger>,
        unchecked: Arc<UncheckedMap>,
        write_queue: Arc<WriteQueue>,
        stats: Arc<Stats>,
    ) -> Arc<Self> {
        let queue = FairQueue::new(
            Box::new(|key: &SourceKey| key.source.max_size()),
            Box::new(|key: &SourceKey| key.source.priority()),
        );
        Arc::new(Self {
            live_limiter: RateLimiter::new(config.live_rate_limit, config.live_burst_ratio),
            config,
            ledger,
            unchecked,
            write_queue,
            stats,
            state: Mutex::new(ProcessorState {
                queue,
                stopped: false,
            }),
            condition: Condvar::new(),
            thread: Mutex::new(None),
            block_processed: ObserverSet::new(),
            batch_processed: ObserverSet::new(),
            rolled_back: ObserverSet::new(),
        })
    }

    /// Spawns the processing thread.
    pub fn start(self: &Arc<Self>) {
        let mut thread = self.thread.lock();
        debug_assert!(thread.is_none());
        let this = self.clone();
        *thread = Some(
            std::thread::Builder::new()
                .name("blck_processing".into())
                .spawn(move || this.run())
                .expect("spawning block processor"),
        );
    }

    /// Stops and joins the processing thread. Queued submissions
    /// resolve as dropped.
    pub fn stop(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.stopped = true;
            state.queue.next_batch(usize::MAX)
        };
        self.condition.notify_all();
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
        for (context, _) in drained {
            context.set_dropped();
        }
    }

    /// Submits a block for processing. Returns false, with the reason
    /// counted, when the processor is full, the work fails its sanity
    /// check, or the live rate limit refuses the submission.
    pub fn add(
        &self,
        block: Arc<Block>,
        source: BlockSource,
        channel: Option<&Arc<TcpChannel>>,
    ) -> bool {
        debug_assert!(source != BlockSource::Forced);
        if self.full() {
            self.stats.inc(StatType::BlockProcessor, StatDetail::Overfill);
            warn!(hash = %block.hash(), %source, "processor queue full, dropping block");
            return false;
        }
        if !self
            .ledger
            .thresholds()
            .validate(&block.root(), block.work())
        {
            self.stats.inc(StatType::BlockProcessor, StatDetail::BadWork);
            debug!(hash = %block.hash(), "insufficient work on admission");
            return false;
        }
        if source.rate_limited() && !self.live_limiter.should_pass(1) {
            self.stats.inc(StatType::BlockProcessor, StatDetail::Overfill);
            return false;
        }
        let context = BlockContext::new(block, source);
        self.add_impl(context, channel)
    }

    /// Submits a block and waits for its processing result. Returns
    /// `None` when the submission was dropped or timed out; processing
    /// continues in the background after a timeout.
    pub fn add_blocking(&self, block: Arc<Block>, source: BlockSource) -> Option<BlockStatus> {
        debug_assert!(source != BlockSource::Forced);
        let context = BlockContext::new(block, source);
        if self.full() {
            self.stats.inc(StatType::BlockProcessor, StatDetail::Overfill);
            context.set_dropped();
            return None;
        }
        if !self.add_impl(context.clone(), None) {
            return None;
        }
        let result = context.wait_result(self.config.block_process_timeout);
        if result.is_none() {
            self.stats.inc(StatType::BlockProcessor, StatDetail::Drop);
        }
        result
    }

    /// Forces a block in, rolling back any competitor at its root. Not
    /// subject to admission limits.
    pub fn force(&self, block: Arc<Block>) {
        self.stats.inc(StatType::BlockProcessor, StatDetail::Forced);
        let context = BlockContext::new(block, BlockSource::Forced);
        self.add_impl(context, None);
    }

    /// Total queued blocks.
    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.total_size()
    }

    /// Queued blocks from one source (without a channel).
    pub fn queue_len_of(&self, source: BlockSource) -> usize {
        self.state
            .lock()
            .queue
            .size(&SourceKey::new(source, None))
    }

    /// Whether the processor is at its backpressure threshold.
    pub fn full(&self) -> bool {
        self.queue_len() >= self.config.full_size
    }

    /// Whether the processor is at half of its backpressure threshold.
    pub fn half_full(&self) -> bool {
        self.queue_len() >= self.config.full_size / 2
    }

    /// Container size introspection.
    pub fn container_info(&self) -> ContainerInfo {
        let state = self.state.lock();
        ContainerInfo::default().node("queue", state.queue.container_info())
    }

    fn add_impl(&self, context: Arc<BlockContext>, channel: Option<&Arc<TcpChannel>>) -> bool {
        let key = SourceKey::new(context.source(), channel);
        let added = {
            let mut state = self.state.lock();
            if state.stopped {
                false
            } else {
                state.queue.push(context.clone(), key).is_added()
            }
        };
        if added {
            self.stats.inc(StatType::BlockProcessor, StatDetail::Process);
            self.condition.notify_all();
        } else {
            // The queue for this source is at capacity; resolve the
            // promise so blocking callers observe the drop
            context.set_dropped();
            self.stats.inc(StatType::BlockProcessor, StatDetail::Overfill);
        }
        added
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return;
            }
            if !state.queue.is_empty() {
                let results = self.process_batch(&mut state);

                // Fan out results without holding the queue mutex
                MutexGuard::unlocked(&mut state, || {
                    for (status, context) in &results {
                        context.set_result(*status);
                        self.block_processed.notify(&(*status, context.clone()));
                    }
                    self.batch_processed.notify(&results);
                });
            } else {
                state.queue.periodic_cleanup(Duration::from_secs(30));
                let _ = self.condition
                    .wait_for(&mut state, Duration::from_millis(100));
            }
        }
    }

    fn process_batch(
        &self,
        state: &mut MutexGuard<'_, ProcessorState>,
    ) -> Vec<(BlockStatus, Arc<BlockContext>)> {
        // Waiting for the write slot may block on the confirming set;
        // do it without holding the queue mutex
        let (guard, tx) = MutexGuard::unlocked(state, || {
            let guard = self.write_queue.wait(Writer::ProcessBatch);
            let tx = self.ledger.store().tx_begin_write(&[
                Table::Accounts,
                Table::Blocks,
                Table::Frontiers,
                Table::Pending,
            ]);
            (guard, tx)
        });

        let mut results = Vec::new();
        let started = Instant::now();
        // Within one batch, at most min(batch_size, store max) blocks,
        // additionally bounded by wall clock
        let max_count = self.config.batch_size.min(self.ledger.store().max_write_batch());

        if state.queue.total_size() > 64 {
            debug!(queue = state.queue.total_size(), "blocks in processing queue");
        }

        while !state.queue.is_empty()
            && results.len() < max_count
            && started.elapsed() < self.config.batch_max_time
        {
            let (context, key) = state.queue.next();
            let forced = key.source() == BlockSource::Forced;

            let status = MutexGuard::unlocked(state, || {
                if forced {
                    self.rollback_competitor(&tx, context.block());
                }
                self.process_one(&tx, &context)
            });
            results.push((status, context));
        }

        drop(tx);
        drop(guard);

        if results.len() > 1 {
            debug!(
                blocks = results.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "processed batch"
            );
        }
        results
    }

    fn process_one(&self, tx: &WriteTransaction, context: &Arc<BlockContext>) -> BlockStatus {
        let block = context.block();
        let hash = block.hash();
        let status = self.ledger.process(tx, block);

        match status {
            BlockStatus::Progress => {
                // Dependencies may have been waiting on this block
                self.unchecked.trigger(HashOrAccount::from(hash));
                /* Sends check epoch-open gaps for the destination
                account, unless the block is already in the last epoch
                where no further epoch open can follow */
                let epoch = block
                    .sideband()
                    .map(|sideband| sideband.details.epoch)
                    .unwrap_or(Epoch::Epoch0);
                if block.is_send() && epoch < Epoch::MAX {
                    if let Some(destination) = block.destination() {
                        self.unchecked.trigger(HashOrAccount::from(destination));
                    }
                }
            }
            BlockStatus::GapPrevious => {
                self.unchecked
                    .put(HashOrAccount::from(block.previous()), block.clone());
            }
            BlockStatus::GapSource => {
                self.unchecked.put(
                    HashOrAccount::from(self.ledger.block_source(block)),
                    block.clone(),
                );
            }
            BlockStatus::GapEpochOpenPending => {
                // Keyed by the opening account's public key
                self.unchecked
                    .put(HashOrAccount::from(block.account()), block.clone());
            }
            _ => {}
        }

        self.stats.inc(StatType::Ledger, Self::status_detail(status));
        debug!(%hash, status = %status, "processed block");
        status
    }

    /// Replaces the current occupant of a forced block's root, rolling
    /// back the occupant and its dependents.
    fn rollback_competitor(&self, tx: &WriteTransaction, block: &Arc<Block>) {
        let hash = block.hash();
        let Some(successor) = self.ledger.successor(tx, &block.qualified_root()) else {
            return;
        };
        if successor.hash() == hash {
            return;
        }

        debug!(rollback = %successor.hash(), replacement = %hash, "rolling back competitor");
        match self.ledger.rollback(tx, successor.hash()) {
            Ok(rolled_back) => {
                self.stats
                    .add(StatType::Ledger, StatDetail::Rollback, rolled_back.len() as u64);
                debug!(count = rolled_back.len(), "blocks rolled back");
                let initiating_root = block.qualified_root();
                for rolled in rolled_back {
                    self.rolled_back.notify(&(rolled, initiating_root));
                }
            }
            Err(rollback_error) => {
                // A descendant is already confirmed; the fork cannot
                // win here anymore
                self.stats.inc(StatType::Ledger, StatDetail::RollbackFailed);
                error!(
                    hash = %successor.hash(),
                    %rollback_error,
                    "failed to roll back"
                );
            }
        }
    }

    fn status_detail(status: BlockStatus) -> StatDetail {
        match status {
            BlockStatus::Progress => StatDetail::Progress,
            BlockStatus::GapPrevious => StatDetail::GapPrevious,
            BlockStatus::GapSource => StatDetail::GapSource,
            BlockStatus::GapEpochOpenPending => StatDetail::GapEpochOpenPending,
            BlockStatus::Old => StatDetail::Old,
            BlockStatus::BadSignature => StatDetail::BadSignature,
            BlockStatus::NegativeSpend => StatDetail::NegativeSpend,
            BlockStatus::Unreceivable => StatDetail::Unreceivable,
            BlockStatus::Fork => StatDetail::Fork,
            BlockStatus::OpenedBurnAccount => StatDetail::OpenedBurnAccount,
            BlockStatus::BalanceMismatch => StatDetail::BalanceMismatch,
            BlockStatus::RepresentativeMismatch => StatDetail::RepresentativeMismatch,
            BlockStatus::BlockPosition => StatDetail::BlockPosition,
            BlockStatus::InsufficientWork => StatDetail::InsufficientWork,
        }
    }
}
