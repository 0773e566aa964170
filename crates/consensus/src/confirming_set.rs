//! Durable cementing of confirmed blocks.
//!
//! Election winners are handed here by hash. A single worker batches
//! them under the confirmation-height write slot and asks the ledger to
//! advance confirmation heights; observer notifications run on a
//! separate notification thread so cementing never blocks on observer
//! work.

use lattix_core::{ContainerInfo, ObserverSet, StatDetail, StatType, Stats};
use lattix_ledger::{Ledger, Table, WriteQueue, Writer};
use lattix_types::{Block, BlockHash};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

/// Confirming set tuning.
#[derive(Debug, Clone)]
pub struct ConfirmingSetConfig {
    /// Wall-clock bound for one write transaction
    pub batch_time: Duration,
}

impl Default for ConfirmingSetConfig {
    fn default() -> Self {
        Self {
            batch_time: Duration::from_millis(500),
        }
    }
}

#[derive(Default)]
struct SetState {
    set: HashSet<BlockHash>,
    processing: HashSet<BlockHash>,
}

struct Notification {
    cemented: Vec<Arc<Block>>,
    already_cemented: Vec<BlockHash>,
}

/// Set of blocks awaiting durable confirmation.
pub struct ConfirmingSet {
    config: ConfirmingSetConfig,
    ledger: Arc<Ledger>,
    write_queue: Arc<WriteQueue>,
    stats: Arc<Stats>,

    state: Mutex<SetState>,
    condition: Condvar,
    stopped: AtomicBool,
    notifications: Mutex<VecDeque<Notification>>,
    notification_condition: Condvar,
    threads: Mutex<Vec<JoinHandle<()>>>,

    /// Fired once per block whose confirmation height advanced, in
    /// `ledger.confirm` order.
    pub cemented: ObserverSet<Arc<Block>>,
    /// Fired for hashes that were already cemented when the worker
    /// reached them.
    pub already_cemented: ObserverSet<BlockHash>,
}

impl ConfirmingSet {
    /// Creates a stopped confirming set.
    pub fn new(
        config: ConfirmingSetConfig,
        ledger: Arc<Ledger>,
        write_queue: Arc<WriteQueue>,
        stats: Arc<Stats>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            ledger,
            write_queue,
            stats,
            state: Mutex::new(SetState::default()),
            condition: Condvar::new(),
            stopped: AtomicBool::new(false),
            notifications: Mutex::new(VecDeque::new()),
            notification_condition: Condvar::new(),
            threads: Mutex::new(Vec::new()),
            cemented: ObserverSet::new(),
            already_cemented: ObserverSet::new(),
        })
    }

    /// Spawns the cementing worker and the notification dispatcher.
    pub fn start(self: &Arc<Self>) {
        let mut threads = self.threads.lock();
        debug_assert!(threads.is_empty());

        let this = self.clone();
        threads.push(
            std::thread::Builder::new()
                .name("conf_height".into())
                .spawn(move || this.run())
                .expect("spawning confirming set worker"),
        );
        let this = self.clone();
        threads.push(
            std::thread::Builder::new()
                .name("conf_notif".into())
                .spawn(move || this.run_notifications())
                .expect("spawning confirming set notifier"),
        );
    }

    /// Stops and joins both threads.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.condition.notify_all();
        self.notification_condition.notify_all();
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for thread in threads {
            let _ = thread.join();
        }
    }

    /// Adds a block hash to be cemented. Duplicates of anything pending
    /// or in flight are ignored.
    pub fn add(&self, hash: BlockHash) {
        let added = {
            let mut state = self.state.lock();
            if state.processing.contains(&hash) {
                false
            } else {
                state.set.insert(hash)
            }
        };
        if added {
            self.condition.notify_all();
            self.stats.inc(StatType::ConfirmingSet, StatDetail::Insert);
        } else {
            self.stats.inc(StatType::ConfirmingSet, StatDetail::Duplicate);
        }
    }

    /// Whether a hash is pending or currently being cemented.
    pub fn exists(&self, hash: &BlockHash) -> bool {
        let state = self.state.lock();
        state.set.contains(hash) || state.processing.contains(hash)
    }

    /// Number of pending plus in-flight hashes.
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.set.len() + state.processing.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Container size introspection.
    pub fn container_info(&self) -> ContainerInfo {
        let state = self.state.lock();
        let notifications = self.notifications.lock().len();
        ContainerInfo::default()
            .leaf("set", state.set.len(), std::mem::size_of::<BlockHash>())
            .leaf(
                "processing",
                state.processing.len(),
                std::mem::size_of::<BlockHash>(),
            )
            .leaf(
                "notifications",
                notifications,
                std::mem::size_of::<Notification>(),
            )
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn run(&self) {
        let mut state = self.state.lock();
        while !self.is_stopped() {
            self.stats.inc(StatType::ConfirmingSet, StatDetail::Loop);
            if !state.set.is_empty() {
                let progressed = self.run_batch(&mut state);
                if !progressed {
                    // Everything left is waiting for its block to land
                    // in the ledger; retry shortly
                    let _ = self.condition
                        .wait_for(&mut state, Duration::from_millis(50));
                }
            } else {
                self.condition.wait(&mut state);
            }
        }
    }

    /// Returns whether any hash was cemented or recognised as already
    /// cemented; deferred hashes alone make no progress.
    fn run_batch(&self, state: &mut MutexGuard<'_, SetState>) -> bool {
        debug_assert!(state.processing.is_empty());
        // Move pending into the back buffer so producers keep adding
        // while the batch runs
        state.processing = std::mem::take(&mut state.set);
        let batch: Vec<BlockHash> = state.processing.iter().copied().collect();

        let mut cemented = Vec::new();
        let mut already_cemented = Vec::new();
        // Hashes whose block has not reached the ledger yet, e.g. a
        // fork winner still being forced in; retried on a later batch
        let mut deferred = Vec::new();

        let mut remaining = batch.into_iter().peekable();
        while remaining.peek().is_some() && !self.is_stopped() {
            // Waiting for the write slot is potentially slow; do it
            // without holding the set mutex
            let (guard, tx) = MutexGuard::unlocked(state, || {
                let guard = self.write_queue.wait(Writer::ConfirmationHeight);
                let tx = self
                    .ledger
                    .store()
                    .tx_begin_write(&[Table::ConfirmationHeight]);
                (guard, tx)
            });

            // One transaction cements until the batch drains or the
            // deadline passes
            let deadline = Instant::now() + self.config.batch_time;
            while !self.is_stopped() && Instant::now() < deadline {
                let Some(hash) = remaining.next() else {
                    break;
                };
                MutexGuard::unlocked(state, || {
                    if self.ledger.block_get(&tx, &hash).is_none() {
                        deferred.push(hash);
                        return;
                    }
                    let added = self.ledger.confirm(&tx, hash);
                    if !added.is_empty() {
                        self.stats.add(
                            StatType::ConfirmingSet,
                            StatDetail::Confirmed,
                            added.len() as u64,
                        );
                        cemented.extend(added);
                    } else {
                        self.stats
                            .inc(StatType::ConfirmingSet, StatDetail::AlreadyConfirmed);
                        already_cemented.push(hash);
                    }
                });
            }
            drop(tx);
            drop(guard);
        }

        debug!(
            cemented = cemented.len(),
            already = already_cemented.len(),
            deferred = deferred.len(),
            "cemented batch"
        );
        let progressed = !cemented.is_empty() || !already_cemented.is_empty();
        self.queue_notification(Notification {
            cemented,
            already_cemented,
        });
        state.processing.clear();
        for hash in deferred {
            state.set.insert(hash);
        }
        progressed
    }

    fn queue_notification(&self, notification: Notification) {
        self.notifications.lock().push_back(notification);
        self.notification_condition.notify_all();
    }

    fn run_notifications(&self) {
        loop {
            let notification = {
                let mut notifications = self.notifications.lock();
                loop {
                    if let Some(notification) = notifications.pop_front() {
                        break Some(notification);
                    }
                    if self.is_stopped() {
                        break None;
                    }
                    self.notification_condition.wait(&mut notifications);
                }
            };
            let Some(notification) = notification else {
                return;
            };
            self.stats.inc(StatType::ConfirmingSet, StatDetail::Notify);
            for block in &notification.cemented {
                self.cemented.notify(block);
            }
            for hash in &notification.already_cemented {
                self.already_cemented.notify(hash);
            }
        }
    }
}
