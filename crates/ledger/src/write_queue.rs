//! Tagged write-slot queue.
//!
//! Ledger writers do not contend on raw locks; each subsystem waits for
//! its tagged slot and runs exactly one write transaction while holding
//! it. The block processor holds `Writer::ProcessBatch`, the confirming
//! set `Writer::ConfirmationHeight`. Slots are granted in FIFO order.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// Distinct areas write locking is done for; order is irrelevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Writer {
    /// Miscellaneous one-off writers
    Generic,
    /// Block processor batches
    ProcessBatch,
    /// Confirming set cementing batches
    ConfirmationHeight,
    /// Used in tests to emulate a held write lock
    Testing,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Writer>,
}

/// FIFO queue of tagged write slots.
pub struct WriteQueue {
    state: Mutex<State>,
    condition: Condvar,
}

impl WriteQueue {
    /// Creates an empty queue.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            condition: Condvar::new(),
        })
    }

    /// Blocks until the given writer reaches the front of the queue and
    /// returns a guard holding the slot. Dropping the guard releases it
    /// and wakes the next waiter.
    pub fn wait(self: &Arc<Self>, writer: Writer) -> WriteGuard {
        let mut state = self.state.lock();
        // Each subsystem is the sole user of its tag
        debug_assert!(!state.queue.contains(&writer));
        state.queue.push_back(writer);
        while state.queue.front() != Some(&writer) {
            self.condition.wait(&mut state);
        }
        WriteGuard {
            queue: self.clone(),
            writer,
        }
    }

    /// Whether a writer currently holds or awaits a slot.
    pub fn contains(&self, writer: Writer) -> bool {
        self.state.lock().queue.contains(&writer)
    }

    fn release(&self, writer: Writer) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.queue.front(), Some(&writer));
        state.queue.pop_front();
        drop(state);
        self.condition.notify_all();
    }
}

/// Scoped ownership of a write slot.
pub struct WriteGuard {
    queue: Arc<WriteQueue>,
    writer: Writer,
}

impl WriteGuard {
    /// The tag this guard holds.
    pub fn writer(&self) -> Writer {
        self.writer
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.queue.release(self.writer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_single_writer() {
        let queue = WriteQueue::new();
        let guard = queue.wait(Writer::Testing);
        assert!(queue.contains(Writer::Testing));
        drop(guard);
        assert!(!queue.contains(Writer::Testing));
    }

    #[test]
    fn test_writers_serialised_fifo() {
        let queue = WriteQueue::new();
        let guard = queue.wait(Writer::ProcessBatch);

        let queue2 = queue.clone();
        let handle = thread::spawn(move || {
            let _guard = queue2.wait(Writer::ConfirmationHeight);
        });

        // The second writer must block while the first holds its slot
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        assert!(queue.contains(Writer::ConfirmationHeight));

        drop(guard);
        handle.join().unwrap();
        assert!(!queue.contains(Writer::ConfirmationHeight));
    }
}
