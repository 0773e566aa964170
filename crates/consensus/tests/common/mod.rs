//! Shared fixture wiring the consensus pipeline the way the node does.

// Not every test binary exercises every helper
#![allow(dead_code)]

use lattix_consensus::{
    ActiveElections, ActiveElectionsConfig, BlockProcessor, BlockProcessorConfig, BlockSource,
    ConfirmingSet, ConfirmingSetConfig, PriorityScheduler, PrioritySchedulerConfig,
    RepresentativeRegister, VoteRouter,
};
use lattix_core::Stats;
use lattix_ledger::{BlockStatus, Ledger, Store, UncheckedMap, WriteQueue};
use lattix_types::{Account, Amount, Block, BlockHash, WorkThresholds};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const GENESIS_AMOUNT: u128 = 1u128 << 122;

pub fn genesis_account() -> Account {
    Account::from([0x11u8; 32])
}

/// The consensus pipeline assembled over an in-memory ledger, with the
/// same observer wiring the node uses.
pub struct TestPipeline {
    pub stats: Arc<Stats>,
    pub ledger: Arc<Ledger>,
    pub genesis: Arc<Block>,
    pub write_queue: Arc<WriteQueue>,
    pub unchecked: Arc<UncheckedMap>,
    pub confirming_set: Arc<ConfirmingSet>,
    pub vote_router: Arc<VoteRouter>,
    pub reps: Arc<RepresentativeRegister>,
    pub active: Arc<ActiveElections>,
    pub scheduler: Arc<PriorityScheduler>,
    pub processor: Arc<BlockProcessor>,
    started: bool,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_processor_config(BlockProcessorConfig {
            batch_max_time: Duration::from_millis(100),
            block_process_timeout: Duration::from_secs(5),
            ..BlockProcessorConfig::default()
        })
    }

    pub fn with_processor_config(processor_config: BlockProcessorConfig) -> Self {
        let stats = Arc::new(Stats::new());
        let store = Store::new();
        let (ledger, genesis) = Ledger::with_genesis(
            store,
            WorkThresholds::dev(),
            genesis_account(),
            Amount::raw(GENESIS_AMOUNT),
        );
        let ledger = Arc::new(ledger);
        let write_queue = WriteQueue::new();
        let unchecked = UncheckedMap::new(stats.clone());
        let confirming_set = ConfirmingSet::new(
            ConfirmingSetConfig {
                batch_time: Duration::from_millis(100),
            },
            ledger.clone(),
            write_queue.clone(),
            stats.clone(),
        );
        let vote_router = VoteRouter::new(stats.clone());
        // Genesis holds all weight; half of it is quorum
        let reps = Arc::new(RepresentativeRegister::new(
            ledger.clone(),
            Amount::raw(GENESIS_AMOUNT / 2),
        ));
        reps.track(genesis_account(), None);
        let active = ActiveElections::new(
            ActiveElectionsConfig::dev(),
            ledger.clone(),
            reps.clone(),
            confirming_set.clone(),
            vote_router.clone(),
            stats.clone(),
        );
        let scheduler = PriorityScheduler::new(
            PrioritySchedulerConfig::default(),
            ledger.clone(),
            &active,
            stats.clone(),
        );
        let processor = BlockProcessor::new(
            processor_config,
            ledger.clone(),
            unchecked.clone(),
            write_queue.clone(),
            stats.clone(),
        );

        // Forks join the election on their root
        let active_for_forks = Arc::downgrade(&active);
        processor.block_processed.add(move |(status, context)| {
            if *status == BlockStatus::Fork {
                if let Some(active) = active_for_forks.upgrade() {
                    active.publish(context.block());
                }
            }
        });
        // Accepted blocks update their election's ledger fork and
        // become candidates through the scheduler
        let active_for_live = Arc::downgrade(&active);
        let scheduler_for_live = Arc::downgrade(&scheduler);
        let ledger_for_live = ledger.clone();
        processor.block_processed.add(move |(status, context)| {
            if *status == BlockStatus::Progress {
                if let Some(active) = active_for_live.upgrade() {
                    if let Some(election) = active.election(&context.block().qualified_root()) {
                        election.process(context.block(), true);
                    }
                }
                if let Some(scheduler) = scheduler_for_live.upgrade() {
                    let tx = ledger_for_live.store().tx_begin_read();
                    scheduler.activate(&tx, &context.block().account());
                }
            }
        });
        // Rollbacks stop the elections of removed blocks, except the
        // one driving the force
        let active_for_rollbacks = Arc::downgrade(&active);
        processor.rolled_back.add(move |(block, initiating_root)| {
            if block.qualified_root() != *initiating_root {
                if let Some(active) = active_for_rollbacks.upgrade() {
                    active.erase(&block.qualified_root());
                }
            }
        });
        // Elections force fork winners into the processor
        let processor_for_force = Arc::downgrade(&processor);
        active.set_force_hook(move |block| {
            if let Some(processor) = processor_for_force.upgrade() {
                processor.force(block.clone());
            }
        });
        // Cemented blocks activate successor accounts
        let scheduler_for_successors = Arc::downgrade(&scheduler);
        let ledger_for_successors = ledger.clone();
        active.set_activate_hook(move |account| {
            if let Some(scheduler) = scheduler_for_successors.upgrade() {
                let tx = ledger_for_successors.store().tx_begin_read();
                scheduler.activate(&tx, account);
            }
        });
        // Released unchecked blocks re-enter the processor
        let processor_for_unchecked = Arc::downgrade(&processor);
        unchecked.satisfied.add(move |block| {
            if let Some(processor) = processor_for_unchecked.upgrade() {
                processor.add(block.clone(), BlockSource::Unchecked, None);
            }
        });

        Self {
            stats,
            ledger,
            genesis,
            write_queue,
            unchecked,
            confirming_set,
            vote_router,
            reps,
            active,
            scheduler,
            processor,
            started: false,
        }
    }

    pub fn start(&mut self) {
        assert!(!self.started);
        self.started = true;
        self.unchecked.start();
        self.confirming_set.start();
        self.active.start();
        self.scheduler.start();
        self.processor.start();
    }

    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        self.processor.stop();
        self.scheduler.stop();
        self.active.stop();
        self.confirming_set.stop();
        self.unchecked.stop();
    }

    /// A worked send from genesis leaving `remaining` behind.
    pub fn send_from_genesis(
        &self,
        previous: BlockHash,
        destination: Account,
        remaining: u128,
    ) -> Arc<Block> {
        Arc::new(
            Block::send(
                genesis_account(),
                previous,
                genesis_account(),
                Amount::raw(remaining),
                destination,
            )
            .work_for(self.ledger.thresholds()),
        )
    }

    /// A worked open block receiving `source`.
    pub fn open_block(&self, account: Account, amount: u128, source: BlockHash) -> Arc<Block> {
        Arc::new(
            Block::open(account, account, Amount::raw(amount), source)
                .work_for(self.ledger.thresholds()),
        )
    }
}

impl Drop for TestPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn wait_until(predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !predicate() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(10));
    }
}
