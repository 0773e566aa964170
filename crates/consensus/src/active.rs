//! The container of in-flight elections.
//!
//! One election per conflicting qualified root, bounded per behavior
//! category. A request-loop thread drives confirmation solicitation; a
//! cleanup thread trims overfilled buckets; cementing callbacks from
//! the confirming set finish elections and fan out observer
//! notifications.

use crate::confirming_set::ConfirmingSet;
use crate::election::{
    Election, ElectionBehavior, ElectionStatus, ElectionStatusType,
};
use crate::recently::{RecentlyCemented, RecentlyConfirmed};
use crate::reps::RepresentativeRegister;
use crate::solicitor::ConfirmationSolicitor;
use crate::vote_router::VoteRouter;
use lattix_core::{ContainerInfo, ObserverSet, StatDetail, StatType, Stats};
use lattix_ledger::Ledger;
use lattix_types::{Account, Amount, Block, BlockHash, QualifiedRoot, Root};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Active elections tuning.
#[derive(Debug, Clone)]
pub struct ActiveElectionsConfig {
    /// Maximum simultaneous priority elections
    pub size: usize,
    /// Hinted election limit as a percentage of `size`
    pub hinted_limit_percentage: usize,
    /// Optimistic election limit as a percentage of `size`
    pub optimistic_limit_percentage: usize,
    /// Recently-cemented history length
    pub confirmation_history_size: usize,
    /// Recently-confirmed suppression cache size
    pub confirmation_cache: usize,
    /// Cleanup-thread trim threshold per bucket
    pub max_per_bucket: usize,
    /// Request-loop cadence
    pub aec_loop_interval: Duration,
    /// Base network latency unit driving election cadences
    pub base_latency: Duration,
    /// Minimum interval between winner re-broadcasts
    pub block_broadcast_interval: Duration,
    /// Minimum interval between vote re-broadcasts
    pub vote_broadcast_interval: Duration,
}

impl Default for ActiveElectionsConfig {
    fn default() -> Self {
        Self {
            size: 5000,
            hinted_limit_percentage: 20,
            optimistic_limit_percentage: 10,
            confirmation_history_size: 2048,
            confirmation_cache: 65536,
            max_per_bucket: 150,
            aec_loop_interval: Duration::from_millis(300),
            base_latency: Duration::from_secs(1),
            block_broadcast_interval: Duration::from_secs(15),
            vote_broadcast_interval: Duration::from_secs(1),
        }
    }
}

impl ActiveElectionsConfig {
    /// Fast cadences for tests and local development networks.
    pub fn dev() -> Self {
        Self {
            aec_loop_interval: Duration::from_millis(50),
            base_latency: Duration::from_millis(25),
            block_broadcast_interval: Duration::from_millis(500),
            vote_broadcast_interval: Duration::from_millis(100),
            ..Self::default()
        }
    }
}

/// Result of [`ActiveElections::insert`].
pub struct InsertResult {
    /// The election for the root, existing or new
    pub election: Option<Arc<Election>>,
    /// Whether a new election was created
    pub inserted: bool,
}

/// Callback run when an election is erased, letting its originating
/// bucket release its slot.
pub type EraseCallback = Box<dyn Fn(&Arc<Election>) + Send + Sync>;

struct Entry {
    election: Arc<Election>,
    behavior: ElectionBehavior,
    bucket: u64,
    priority: u64,
    erase_callback: Option<EraseCallback>,
}

#[derive(Default)]
struct Container {
    entries: HashMap<QualifiedRoot, Entry>,
    stopped: bool,
}

impl Container {
    fn count_by_behavior(&self, behavior: ElectionBehavior) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.behavior == behavior)
            .count()
    }
}

type ForceHook = Arc<dyn Fn(&Arc<Block>) + Send + Sync>;
type ActivateHook = Arc<dyn Fn(&Account) + Send + Sync>;

/// The set of in-flight elections and its worker threads.
pub struct ActiveElections {
    config: ActiveElectionsConfig,
    stats: Arc<Stats>,
    ledger: Arc<Ledger>,
    reps: Arc<RepresentativeRegister>,
    confirming_set: Arc<ConfirmingSet>,
    vote_router: Arc<VoteRouter>,

    /// Suppresses re-elections for recently decided roots.
    pub recently_confirmed: RecentlyConfirmed,
    /// Completed election statuses for observability.
    pub recently_cemented: RecentlyCemented,

    mutex: Mutex<Container>,
    condition: Condvar,
    winner_details: Mutex<HashMap<BlockHash, Arc<Election>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,

    force_hook: Mutex<Option<ForceHook>>,
    activate_hook: Mutex<Option<ActivateHook>>,

    /// Fired when an election starts, with the initiating hash.
    pub active_started: ObserverSet<BlockHash>,
    /// Fired for hashes dropped from erased or lost elections.
    pub active_stopped: ObserverSet<BlockHash>,
    /// Fired for every locally generated vote: root, hash, final.
    pub vote_generated: ObserverSet<(Root, BlockHash, bool)>,
    /// Fired once per cemented winner: status, account, amount, is_send.
    pub confirmed: ObserverSet<(ElectionStatus, Account, Amount, bool)>,
    /// Fired when an account balance changes: account, is_pending_side.
    pub account_balance_changed: ObserverSet<(Account, bool)>,
    /// Fired whenever election slots may have opened up.
    pub vacancy_updated: ObserverSet<()>,
}

impl ActiveElections {
    /// Creates the container and registers its cementing callbacks with
    /// the confirming set. Threads start with [`ActiveElections::start`].
    pub fn new(
        config: ActiveElectionsConfig,
        ledger: Arc<Ledger>,
        reps: Arc<RepresentativeRegister>,
        confirming_set: Arc<ConfirmingSet>,
        vote_router: Arc<VoteRouter>,
        stats: Arc<Stats>,
    ) -> Arc<Self> {
        let this = Arc::new(Self {
            recently_confirmed: RecentlyConfirmed::new(config.confirmation_cache),
            recently_cemented: RecentlyCemented::new(config.confirmation_history_size),
            config,
            stats,
            ledger,
            reps,
            confirming_set: confirming_set.clone(),
            vote_router,
            mutex: Mutex::new(Container::default()),
            condition: Condvar::new(),
            winner_details: Mutex::new(HashMap::new()),
            threads: Mutex::new(Vec::new()),
            force_hook: Mutex::new(None),
            activate_hook: Mutex::new(None),
            active_started: ObserverSet::new(),
            active_stopped: ObserverSet::new(),
            vote_generated: ObserverSet::new(),
            confirmed: ObserverSet::new(),
            account_balance_changed: ObserverSet::new(),
            vacancy_updated: ObserverSet::new(),
        });

        let cemented = Arc::downgrade(&this);
        confirming_set.cemented.add(move |block| {
            if let Some(active) = cemented.upgrade() {
                active.block_cemented_callback(block);
            }
        });
        let already = Arc::downgrade(&this);
        confirming_set.already_cemented.add(move |hash| {
            if let Some(active) = already.upgrade() {
                active.block_already_cemented_callback(hash);
            }
        });
        this
    }

    /// Wires the hook that forces fork winners into the block
    /// processor.
    pub fn set_force_hook(&self, hook: impl Fn(&Arc<Block>) + Send + Sync + 'static) {
        *self.force_hook.lock() = Some(Arc::new(hook));
    }

    /// Wires the hook that activates successor accounts after
    /// cementing.
    pub fn set_activate_hook(&self, hook: impl Fn(&Account) + Send + Sync + 'static) {
        *self.activate_hook.lock() = Some(Arc::new(hook));
    }

    /// Spawns the request loop and cleanup threads.
    pub fn start(self: &Arc<Self>) {
        let mut threads = self.threads.lock();
        debug_assert!(threads.is_empty());

        let this = self.clone();
        threads.push(
            std::thread::Builder::new()
                .name("request_loop".into())
                .spawn(move || this.request_loop())
                .expect("spawning election request loop"),
        );
        let this = self.clone();
        threads.push(
            std::thread::Builder::new()
                .name("active_cleanup".into())
                .spawn(move || this.run_cleanup())
                .expect("spawning election cleanup"),
        );
    }

    /// Stops the threads and clears all elections.
    pub fn stop(&self) {
        {
            let mut container = self.mutex.lock();
            container.stopped = true;
        }
        self.condition.notify_all();
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for thread in threads {
            let _ = thread.join();
        }
        self.clear();
    }

    /// Starts an election for the block's root, or returns the existing
    /// one. Roots in the recently-confirmed cache never restart.
    pub fn insert(
        self: &Arc<Self>,
        block: &Arc<Block>,
        behavior: ElectionBehavior,
        bucket: u64,
        priority: u64,
        erase_callback: Option<EraseCallback>,
    ) -> InsertResult {
        debug_assert!(block.sideband().is_some(), "elections need processed blocks");
        let root = block.qualified_root();
        let hash = block.hash();

        let mut container = self.mutex.lock();
        if container.stopped {
            return InsertResult {
                election: None,
                inserted: false,
            };
        }
        if let Some(existing) = container.entries.get(&root) {
            return InsertResult {
                election: Some(existing.election.clone()),
                inserted: false,
            };
        }
        if self.recently_confirmed.contains_root(&root) {
            return InsertResult {
                election: None,
                inserted: false,
            };
        }

        let election = Election::new(self, block.clone(), behavior);
        container.entries.insert(
            root,
            Entry {
                election: election.clone(),
                behavior,
                bucket,
                priority,
                erase_callback,
            },
        );
        self.vote_router.connect(hash, Arc::downgrade(&election));

        self.stats
            .inc(StatType::ActiveStarted, behavior.stat_detail());
        debug!(%hash, %behavior, bucket, priority, "started new election");
        drop(container);

        self.condition.notify_all();
        self.vote_router.trigger_vote_cache(&hash);
        self.active_started.notify(&hash);
        self.vacancy_updated.notify(&());

        // Votes are generated immediately for inserted elections
        election.broadcast_vote_immediate();
        election.transition_active();

        InsertResult {
            election: Some(election),
            inserted: true,
        }
    }

    /// Adds a competing fork block to the existing election for its
    /// root. Returns true when the block was added.
    pub fn publish(&self, block: &Arc<Block>) -> bool {
        let election = {
            let container = self.mutex.lock();
            container
                .entries
                .get(&block.qualified_root())
                .map(|entry| entry.election.clone())
        };
        let Some(election) = election else {
            return false;
        };
        if election.process(block, false) {
            self.vote_router
                .connect(block.hash(), Arc::downgrade(&election));
            self.vote_router.trigger_vote_cache(&block.hash());
            self.stats
                .inc(StatType::Active, StatDetail::ElectionBlockConflict);
            trace!(hash = %block.hash(), "fork joined election");
            true
        } else {
            false
        }
    }

    /// Erases the election for a root, if any.
    pub fn erase(&self, root: &QualifiedRoot) -> bool {
        let entry = {
            let mut container = self.mutex.lock();
            container.entries.remove(root)
        };
        match entry {
            Some(entry) => {
                self.erase_cleanup(entry);
                true
            }
            None => false,
        }
    }

    /// Erases a specific election.
    pub fn erase_election(&self, election: &Arc<Election>) -> bool {
        let root = election.qualified_root();
        let entry = {
            let mut container = self.mutex.lock();
            match container.entries.get(&root) {
                Some(entry) if Arc::ptr_eq(&entry.election, election) => {
                    container.entries.remove(&root)
                }
                _ => None,
            }
        };
        match entry {
            Some(entry) => {
                self.erase_cleanup(entry);
                true
            }
            None => false,
        }
    }

    fn erase_cleanup(&self, entry: Entry) {
        let election = entry.election;
        self.vote_router.disconnect(&election);

        self.stats.inc(StatType::Active, StatDetail::ElectionCleanup);
        let completion = if election.confirmed() {
            StatType::ActiveConfirmed
        } else if election.failed() {
            StatType::ActiveTimeout
        } else {
            StatType::ActiveDropped
        };
        self.stats.inc(completion, entry.behavior.stat_detail());
        debug!(
            root = %election.qualified_root(),
            behavior = %election.behavior(),
            state = %election.state(),
            "erased election"
        );

        if let Some(callback) = &entry.erase_callback {
            callback(&election);
        }
        self.vacancy_updated.notify(&());

        let winner_hash = election.winner().map(|winner| winner.hash());
        let confirmed = election.confirmed();
        for (hash, _) in election.blocks() {
            // Blocks that did not win a confirmed election are reported
            // as stopped
            if !confirmed || Some(hash) != winner_hash {
                self.active_stopped.notify(&hash);
            }
        }
    }

    /// The election for a root, if one is running.
    pub fn election(&self, root: &QualifiedRoot) -> Option<Arc<Election>> {
        self.mutex
            .lock()
            .entries
            .get(root)
            .map(|entry| entry.election.clone())
    }

    /// Whether a root has a running election.
    pub fn active(&self, root: &QualifiedRoot) -> bool {
        self.mutex.lock().entries.contains_key(root)
    }

    /// Number of running elections.
    pub fn len(&self) -> usize {
        self.mutex.lock().entries.len()
    }

    /// True when no elections are running.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of running elections with a behavior.
    pub fn count_by_behavior(&self, behavior: ElectionBehavior) -> usize {
        self.mutex.lock().count_by_behavior(behavior)
    }

    /// Elections a behavior may run simultaneously.
    pub fn limit(&self, behavior: ElectionBehavior) -> i64 {
        match behavior {
            ElectionBehavior::Manual => i64::MAX,
            ElectionBehavior::Priority => self.config.size as i64,
            ElectionBehavior::Hinted => {
                (self.config.hinted_limit_percentage * self.config.size / 100) as i64
            }
            ElectionBehavior::Optimistic => {
                (self.config.optimistic_limit_percentage * self.config.size / 100) as i64
            }
        }
    }

    /// Free election slots for a behavior; negative when over the soft
    /// limit.
    pub fn vacancy(&self, behavior: ElectionBehavior) -> i64 {
        let container = self.mutex.lock();
        match behavior {
            ElectionBehavior::Manual => i64::MAX,
            ElectionBehavior::Priority => {
                self.limit(behavior) - container.entries.len() as i64
            }
            ElectionBehavior::Hinted | ElectionBehavior::Optimistic => {
                self.limit(behavior) - container.count_by_behavior(behavior) as i64
            }
        }
    }

    /// Elections currently running for a priority bucket, with the
    /// worst (highest) priority value among them.
    pub fn bucket_info(&self, bucket: u64) -> (usize, Option<(Arc<Election>, u64)>) {
        let container = self.mutex.lock();
        let mut count = 0;
        let mut worst: Option<(Arc<Election>, u64)> = None;
        for entry in container.entries.values() {
            if entry.behavior == ElectionBehavior::Priority && entry.bucket == bucket {
                count += 1;
                if worst.as_ref().map_or(true, |(_, priority)| entry.priority > *priority) {
                    worst = Some((entry.election.clone(), entry.priority));
                }
            }
        }
        (count, worst)
    }

    /// A snapshot of all running elections.
    pub fn list(&self) -> Vec<Arc<Election>> {
        self.mutex
            .lock()
            .entries
            .values()
            .map(|entry| entry.election.clone())
            .collect()
    }

    /// Drops every election without completing it.
    pub fn clear(&self) {
        let entries: Vec<Entry> = {
            let mut container = self.mutex.lock();
            container.entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            self.vote_router.disconnect(&entry.election);
        }
        self.vacancy_updated.notify(&());
    }

    /// Container size introspection.
    pub fn container_info(&self) -> ContainerInfo {
        ContainerInfo::default()
            .leaf("elections", self.len(), std::mem::size_of::<Entry>())
            .leaf(
                "election_winner_details",
                self.winner_details.lock().len(),
                std::mem::size_of::<(BlockHash, Arc<Election>)>(),
            )
            .node("recently_confirmed", self.recently_confirmed.container_info())
            .node("recently_cemented", self.recently_cemented.container_info())
    }

    pub(crate) fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub(crate) fn config(&self) -> &ActiveElectionsConfig {
        &self.config
    }

    pub(crate) fn representatives(&self) -> &Arc<RepresentativeRegister> {
        &self.reps
    }

    pub(crate) fn confirming_set(&self) -> &Arc<ConfirmingSet> {
        &self.confirming_set
    }

    pub(crate) fn force_block(&self, block: &Arc<Block>) {
        let hook = self.force_hook.lock().clone();
        if let Some(hook) = hook {
            hook(block);
        }
    }

    /// Tracks which election produced a winner so the cementing
    /// callback can attribute the confirmation.
    pub(crate) fn add_election_winner_details(&self, hash: BlockHash, election: Arc<Election>) {
        self.winner_details.lock().insert(hash, election);
    }

    fn remove_election_winner_details(&self, hash: &BlockHash) -> Option<Arc<Election>> {
        self.winner_details.lock().remove(hash)
    }

    /// Number of tracked winner details.
    pub fn election_winner_details_len(&self) -> usize {
        self.winner_details.lock().len()
    }

    fn block_cemented_callback(self: &Arc<Self>, block: &Arc<Block>) {
        if let Some(election) = self.election(&block.qualified_root()) {
            election.try_confirm(&block.hash());
        }
        let winner_election = self.remove_election_winner_details(&block.hash());

        let mut status = winner_election
            .as_ref()
            .map_or_else(ElectionStatus::default, |election| election.current_status());
        if status.winner.is_none() {
            status.winner = Some(block.clone());
        }
        // Attribute the cementing: quorum when the confirming set still
        // tracks the hash, otherwise by which side observed it first
        status.status_type = if self.confirming_set.exists(&block.hash()) {
            ElectionStatusType::ActiveConfirmedQuorum
        } else if winner_election.is_some() {
            ElectionStatusType::ActiveConfirmationHeight
        } else {
            ElectionStatusType::InactiveConfirmationHeight
        };
        let was_active = matches!(
            status.status_type,
            ElectionStatusType::ActiveConfirmedQuorum
                | ElectionStatusType::ActiveConfirmationHeight
        );
        self.recently_cemented.put(status.clone());

        // Notify observers outside all container locks
        let tx = self.ledger.store().tx_begin_read();
        let account = block
            .sideband()
            .map_or_else(|| block.account(), |sideband| sideband.account);
        let amount = self
            .ledger
            .block_amount(&tx, &block.hash())
            .unwrap_or(Amount::ZERO);
        let is_send = block.is_send();
        self.confirmed
            .notify(&(status, account, amount, is_send));
        if !amount.is_zero() {
            self.account_balance_changed.notify(&(account, false));
            if let Some(destination) = block.destination() {
                self.account_balance_changed.notify(&(destination, true));
            }
        }
        drop(tx);

        // Activations cascade only from blocks with an active election
        if was_active {
            let hook = self.activate_hook.lock().clone();
            if let Some(hook) = hook {
                hook(&account);
                if is_send {
                    if let Some(destination) = block.destination() {
                        if destination != account {
                            hook(&destination);
                        }
                    }
                }
            }
        }
    }

    fn block_already_cemented_callback(&self, hash: &BlockHash) {
        // The winner details entry may remain when confirmation raced
        // ahead of the election bookkeeping; drop it
        self.remove_election_winner_details(hash);
    }

    fn request_loop(self: &Arc<Self>) {
        loop {
            {
                let container = self.mutex.lock();
                if container.stopped {
                    return;
                }
            }
            let tick_start = Instant::now();
            self.stats.inc(StatType::Active, StatDetail::Loop);
            self.request_confirm();

            let interval = self.config.aec_loop_interval;
            let wakeup = std::cmp::max(tick_start + interval, Instant::now() + interval / 2);
            let mut container = self.mutex.lock();
            while !container.stopped && Instant::now() < wakeup {
                let timeout = wakeup.saturating_duration_since(Instant::now());
                let _ = self.condition.wait_for(&mut container, timeout);
            }
            if container.stopped {
                return;
            }
        }
    }

    fn request_confirm(self: &Arc<Self>) {
        let elections = self.list();

        let mut solicitor = ConfirmationSolicitor::new();
        solicitor.prepare(self.reps.principal_representatives(usize::MAX));

        for election in &elections {
            if election.transition_time(&mut solicitor) {
                self.erase_election(election);
            }
        }
        solicitor.flush();
    }

    fn run_cleanup(self: &Arc<Self>) {
        loop {
            {
                let mut container = self.mutex.lock();
                if container.stopped {
                    return;
                }
                let _ = self.condition
                    .wait_for(&mut container, Duration::from_secs(1));
                if container.stopped {
                    return;
                }
            }
            self.trim();
        }
    }

    /// Cancels the worst election of any bucket holding more than
    /// `max_per_bucket` priority elections.
    fn trim(&self) {
        let mut per_bucket: HashMap<u64, (usize, Option<(Arc<Election>, u64)>)> = HashMap::new();
        {
            let container = self.mutex.lock();
            for entry in container.entries.values() {
                if entry.behavior != ElectionBehavior::Priority {
                    continue;
                }
                let slot = per_bucket.entry(entry.bucket).or_insert((0, None));
                slot.0 += 1;
                if slot.1.as_ref().map_or(true, |(_, priority)| entry.priority > *priority) {
                    slot.1 = Some((entry.election.clone(), entry.priority));
                }
            }
        }
        for (_, (count, worst)) in per_bucket {
            if count > self.config.max_per_bucket {
                if let Some((election, _)) = worst {
                    self.stats.inc(StatType::Active, StatDetail::Trim);
                    self.erase_election(&election);
                }
            }
        }
    }
}
