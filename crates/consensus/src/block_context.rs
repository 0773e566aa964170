//! One queued block submission and its result promise.

use crate::BlockSource;
use lattix_ledger::BlockStatus;
use lattix_types::Block;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The result slot of one submission. Resolved exactly once; a context
/// dropped before processing resolves with no status so blocking
/// callers observe the drop instead of hanging.
struct ResultCell {
    value: Mutex<Option<Option<BlockStatus>>>,
    condition: Condvar,
}

/// A block submission travelling through the processor queue.
pub struct BlockContext {
    block: Arc<Block>,
    source: BlockSource,
    arrival: Instant,
    result: ResultCell,
}

impl BlockContext {
    /// Wraps a block and its source for queueing.
    pub fn new(block: Arc<Block>, source: BlockSource) -> Arc<Self> {
        Arc::new(Self {
            block,
            source,
            arrival: Instant::now(),
            result: ResultCell {
                value: Mutex::new(None),
                condition: Condvar::new(),
            },
        })
    }

    /// The submitted block.
    pub fn block(&self) -> &Arc<Block> {
        &self.block
    }

    /// The submission source.
    pub fn source(&self) -> BlockSource {
        self.source
    }

    /// When the submission entered the processor.
    pub fn arrival(&self) -> Instant {
        self.arrival
    }

    /// Resolves the submission with its processing result. Only the
    /// first resolution is observed.
    pub fn set_result(&self, status: BlockStatus) {
        self.resolve(Some(status));
    }

    /// Resolves the submission as dropped before processing.
    pub fn set_dropped(&self) {
        self.resolve(None);
    }

    /// Blocks until the submission resolves or the timeout elapses.
    /// Returns the status, or `None` on drop or timeout.
    pub fn wait_result(&self, timeout: Duration) -> Option<BlockStatus> {
        let deadline = Instant::now() + timeout;
        let mut value = self.result.value.lock();
        while value.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if self
                .result
                .condition
                .wait_until(&mut value, deadline)
                .timed_out()
            {
                break;
            }
        }
        value.flatten()
    }

    fn resolve(&self, outcome: Option<BlockStatus>) {
        let mut value = self.result.value.lock();
        if value.is_none() {
            *value = Some(outcome);
            drop(value);
            self.result.condition.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattix_types::{Account, Amount, BlockHash};

    fn context() -> Arc<BlockContext> {
        let account = Account::from([1u8; 32]);
        BlockContext::new(
            Arc::new(Block::open(
                account,
                account,
                Amount::raw(1),
                BlockHash::from([2u8; 32]),
            )),
            BlockSource::Local,
        )
    }

    #[test]
    fn test_result_resolves_waiter() {
        let context = context();
        let waiter = context.clone();
        let handle = std::thread::spawn(move || waiter.wait_result(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        context.set_result(BlockStatus::Progress);
        assert_eq!(handle.join().unwrap(), Some(BlockStatus::Progress));
    }

    #[test]
    fn test_first_resolution_wins() {
        let context = context();
        context.set_result(BlockStatus::Old);
        context.set_result(BlockStatus::Progress);
        assert_eq!(context.wait_result(Duration::ZERO), Some(BlockStatus::Old));
    }

    #[test]
    fn test_dropped_resolves_none() {
        let context = context();
        context.set_dropped();
        assert_eq!(context.wait_result(Duration::from_secs(1)), None);
    }

    #[test]
    fn test_zero_timeout_returns_immediately() {
        let context = context();
        let started = Instant::now();
        assert_eq!(context.wait_result(Duration::ZERO), None);
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
