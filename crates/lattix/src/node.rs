//! The full node composition root.
//!
//! `Node` owns every subsystem and wires typed collaborator references
//! into each component's constructor; no component reaches out to a
//! global. Observer wiring follows the data flow: processor results
//! feed elections and the scheduler, election winners feed the
//! confirming set, cemented blocks feed back into scheduling.

use anyhow::{Context, Result};
use lattix_config::Config;
use lattix_consensus::{
    ActiveElections, ActiveElectionsConfig, BlockProcessor, BlockProcessorConfig, BlockSource,
    BucketConfig, ConfirmingSet, ConfirmingSetConfig, PriorityScheduler, PrioritySchedulerConfig,
    RepresentativeRegister, VoteRouter,
};
use lattix_core::{ContainerInfo, Stats};
use lattix_ledger::{BlockStatus, Ledger, Store, UncheckedMap, WriteQueue};
use lattix_network::{
    OutboundLimiter, OutboundLimiterConfig, PeerMap, TcpListenerConfig, TcpListenerService,
};
use lattix_types::{Amount, Block, WorkThresholds};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The assembled Lattix node.
pub struct Node {
    config: Config,
    runtime: tokio::runtime::Runtime,

    /// Process-wide counters
    pub stats: Arc<Stats>,
    /// The account-graph ledger
    pub ledger: Arc<Ledger>,
    /// The genesis block
    pub genesis: Arc<Block>,
    /// Tagged ledger write slots
    pub write_queue: Arc<WriteQueue>,
    /// Parked blocks missing a dependency
    pub unchecked: Arc<UncheckedMap>,
    /// Shared egress bandwidth limiter
    pub outbound_limiter: Arc<OutboundLimiter>,
    /// Multi-indexed registry of realtime channels
    pub peer_map: Arc<PeerMap>,
    /// Inbound acceptor and connection table
    pub listener: Arc<TcpListenerService>,
    /// Vote fan-in to elections
    pub vote_router: Arc<VoteRouter>,
    /// Known representatives and quorum
    pub representatives: Arc<RepresentativeRegister>,
    /// Durable cementing pipeline
    pub confirming_set: Arc<ConfirmingSet>,
    /// In-flight elections
    pub active: Arc<ActiveElections>,
    /// Balance-tiered election admission
    pub scheduler: Arc<PriorityScheduler>,
    /// Block ingestion pipeline
    pub processor: Arc<BlockProcessor>,

    purge_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Node {
    /// Builds a node from its configuration. Nothing runs until
    /// [`Node::start`].
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("lattix_io")
            .build()
            .context("building async runtime")?;

        let stats = Arc::new(Stats::new());
        let thresholds = if config.node.dev_network {
            WorkThresholds::dev()
        } else {
            WorkThresholds::production()
        };

        let store = Store::new();
        let (ledger, genesis) = Ledger::with_genesis(
            store,
            thresholds,
            config.genesis.account,
            config.genesis.amount,
        );
        let ledger = Arc::new(ledger);
        let write_queue = WriteQueue::new();
        let unchecked = UncheckedMap::new(stats.clone());

        let outbound_limiter = Arc::new(OutboundLimiter::new(OutboundLimiterConfig {
            standard_limit: config.network.outbound_bandwidth_limit,
            standard_burst_ratio: config.network.outbound_burst_ratio,
            ..OutboundLimiterConfig::default()
        }));
        let peer_map = Arc::new(PeerMap::new(stats.clone()));
        let listener = TcpListenerService::new(
            TcpListenerConfig {
                port: config.tcp.port,
                max_inbound_connections: config.tcp.max_inbound_connections,
                max_peers_per_ip: config.tcp.max_peers_per_ip,
                max_peers_per_subnetwork: config.tcp.max_peers_per_subnetwork,
            },
            stats.clone(),
            outbound_limiter.clone(),
        );

        let vote_router = VoteRouter::new(stats.clone());
        // Two thirds of the genesis supply must agree for quorum
        let representatives = Arc::new(RepresentativeRegister::new(
            ledger.clone(),
            Amount::raw(config.genesis.amount.number() / 3 * 2),
        ));
        representatives.track(config.genesis.account, None);

        let confirming_set = ConfirmingSet::new(
            ConfirmingSetConfig {
                batch_time: Duration::from_millis(config.confirming_set.batch_time_ms),
            },
            ledger.clone(),
            write_queue.clone(),
            stats.clone(),
        );

        let active_base = if config.node.dev_network {
            ActiveElectionsConfig::dev()
        } else {
            ActiveElectionsConfig::default()
        };
        let active_config = ActiveElectionsConfig {
            size: config.active.size,
            hinted_limit_percentage: config.active.hinted_limit_percentage,
            optimistic_limit_percentage: config.active.optimistic_limit_percentage,
            confirmation_history_size: config.active.confirmation_history_size,
            confirmation_cache: config.active.confirmation_cache,
            max_per_bucket: config.active.max_per_bucket,
            aec_loop_interval: Duration::from_millis(config.active.aec_loop_interval_ms),
            ..active_base
        };
        let active = ActiveElections::new(
            active_config,
            ledger.clone(),
            representatives.clone(),
            confirming_set.clone(),
            vote_router.clone(),
            stats.clone(),
        );

        let scheduler = PriorityScheduler::new(
            PrioritySchedulerConfig {
                enabled: true,
                bucket: BucketConfig {
                    max_blocks: config.buckets.max_blocks,
                    reserved_elections: config.buckets.reserved_elections,
                    max_elections: config.buckets.max_elections,
                },
            },
            ledger.clone(),
            &active,
            stats.clone(),
        );

        let processor = BlockProcessor::new(
            BlockProcessorConfig {
                full_size: config.block_processor.full_size,
                batch_size: config.block_processor.batch_size,
                batch_max_time: Duration::from_millis(config.block_processor.batch_max_time_ms),
                block_process_timeout: Duration::from_secs(
                    config.node.block_process_timeout_secs,
                ),
                ..BlockProcessorConfig::default()
            },
            ledger.clone(),
            unchecked.clone(),
            write_queue.clone(),
            stats.clone(),
        );

        Self::wire(
            &ledger,
            &unchecked,
            &peer_map,
            &listener,
            &active,
            &scheduler,
            &processor,
        );

        info!(
            genesis = %genesis.hash(),
            dev_network = config.node.dev_network,
            "node assembled"
        );

        Ok(Self {
            config,
            runtime,
            stats,
            ledger,
            genesis,
            write_queue,
            unchecked,
            outbound_limiter,
            peer_map,
            listener,
            vote_router,
            representatives,
            confirming_set,
            active,
            scheduler,
            processor,
            purge_task: parking_lot::Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    fn wire(
        ledger: &Arc<Ledger>,
        unchecked: &Arc<UncheckedMap>,
        peer_map: &Arc<PeerMap>,
        listener: &Arc<TcpListenerService>,
        active: &Arc<ActiveElections>,
        scheduler: &Arc<PriorityScheduler>,
        processor: &Arc<BlockProcessor>,
    ) {
        // Forks join the election on their root
        let active_for_forks = Arc::downgrade(active);
        processor.block_processed.add(move |(status, context)| {
            if *status == BlockStatus::Fork {
                if let Some(active) = active_for_forks.upgrade() {
                    active.publish(context.block());
                }
            }
        });

        // Accepted blocks update their election's ledger fork and
        // become candidates through the scheduler
        let active_for_live = Arc::downgrade(active);
        let scheduler_for_live = Arc::downgrade(scheduler);
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
        let active_for_rollbacks = Arc::downgrade(active);
        processor.rolled_back.add(move |(block, initiating_root)| {
            if block.qualified_root() != *initiating_root {
                if let Some(active) = active_for_rollbacks.upgrade() {
                    active.erase(&block.qualified_root());
                }
            }
        });

        // Elections force fork winners into the processor
        let processor_for_force = Arc::downgrade(processor);
        active.set_force_hook(move |block| {
            if let Some(processor) = processor_for_force.upgrade() {
                processor.force(block.clone());
            }
        });

        // Cemented blocks activate successor accounts
        let scheduler_for_successors = Arc::downgrade(scheduler);
        let ledger_for_successors = ledger.clone();
        active.set_activate_hook(move |account| {
            if let Some(scheduler) = scheduler_for_successors.upgrade() {
                let tx = ledger_for_successors.store().tx_begin_read();
                scheduler.activate(&tx, account);
            }
        });

        // Released unchecked blocks re-enter the processor
        let processor_for_unchecked = Arc::downgrade(processor);
        unchecked.satisfied.add(move |block| {
            if let Some(processor) = processor_for_unchecked.upgrade() {
                processor.add(block.clone(), BlockSource::Unchecked, None);
            }
        });

        // Admitted connections register in the peer indices
        let peer_map_for_accepts = Arc::downgrade(peer_map);
        listener.connection_accepted.add(move |channel| {
            if let Some(peer_map) = peer_map_for_accepts.upgrade() {
                peer_map.insert(channel.clone());
            }
        });
    }

    /// Starts every subsystem: workers first, ingress last.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("starting node");
        self.unchecked.start();
        self.confirming_set.start();
        self.active.start();
        self.scheduler.start();
        self.processor.start();
        self.listener
            .start(self.runtime.handle())
            .context("starting tcp listener")?;

        // Periodic purge of idle or outdated channels
        let peer_map = Arc::downgrade(&self.peer_map);
        let keepalive = Duration::from_secs(self.config.tcp.keepalive_period_secs);
        let idle_timeout = Duration::from_secs(self.config.tcp.idle_timeout_secs);
        let version_min = self.config.network.protocol_version_min;
        let task = self.runtime.spawn(async move {
            let mut interval = tokio::time::interval(keepalive);
            loop {
                interval.tick().await;
                let Some(peer_map) = peer_map.upgrade() else {
                    return;
                };
                let cutoff = std::time::Instant::now() - idle_timeout;
                peer_map.purge(cutoff, version_min);
            }
        });
        *self.purge_task.lock() = Some(task);
        Ok(())
    }

    /// Stops every subsystem in reverse dependency order. Idempotent.
    pub fn stop(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping node");
        if let Some(task) = self.purge_task.lock().take() {
            task.abort();
        }
        self.listener.stop();
        self.processor.stop();
        self.scheduler.stop();
        self.active.stop();
        self.confirming_set.stop();
        self.unchecked.stop();
    }

    /// The node configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The async runtime handle for network operations.
    pub fn runtime(&self) -> &tokio::runtime::Handle {
        self.runtime.handle()
    }

    /// Submits a locally created block and waits for its processing
    /// result.
    pub fn process_local(&self, block: Arc<Block>) -> Option<BlockStatus> {
        self.processor.add_blocking(block, BlockSource::Local)
    }

    /// Initiates an outbound connection to a peer.
    pub fn connect(&self, remote: std::net::SocketAddr) -> bool {
        self.listener.connect(remote, self.runtime.handle())
    }

    /// Aggregated container sizes of every stateful component.
    pub fn container_info(&self) -> ContainerInfo {
        ContainerInfo::default()
            .node("store", self.ledger.store().container_info())
            .node("unchecked", self.unchecked.container_info())
            .node("active", self.active.container_info())
            .node("scheduler", self.scheduler.container_info())
            .node("confirming_set", self.confirming_set.container_info())
            .node("processor", self.processor.container_info())
            .node("vote_router", self.vote_router.container_info())
            .node("peers", self.peer_map.container_info())
            .node("listener", self.listener.container_info())
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}
