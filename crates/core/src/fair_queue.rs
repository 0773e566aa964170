//! Bounded, weighted round-robin multi-source queue.
//!
//! Producers push `(request, source)` pairs; one consumer pops them one
//! at a time or in batches. Each source gets its own bounded FIFO,
//! created on first use from the `max_size` and `priority` callbacks.
//! The consumer visits sources round-robin and serves up to `priority`
//! consecutive items from a source before advancing, so a burst on one
//! low-priority source cannot starve the others. Weight is applied by
//! counter, not by inter-arrival timing, keeping pops O(log n) in the
//! number of sources.
//!
//! The queue is not internally synchronised; owners wrap it in their own
//! mutex, matching how the block processor and other consumers hold
//! their state.

use crate::ContainerInfo;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

/// A source key for a [`FairQueue`].
///
/// Sources bound to a finite resource (for example a network channel)
/// report `alive() == false` once that resource is gone, and
/// [`FairQueue::periodic_cleanup`] drops their FIFOs.
pub trait QueueSource: Clone + Ord {
    /// Whether this source can still produce requests.
    fn alive(&self) -> bool {
        true
    }
}

/// Outcome of a [`FairQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    /// The request was enqueued.
    Added,
    /// The source FIFO was at capacity and the request was discarded.
    Dropped,
}

impl PushResult {
    /// True when the request was enqueued.
    pub fn is_added(&self) -> bool {
        matches!(self, PushResult::Added)
    }
}

struct Entry<R> {
    requests: VecDeque<R>,
    priority: usize,
    max_size: usize,
}

impl<R> Entry<R> {
    fn new(max_size: usize, priority: usize) -> Self {
        Self {
            requests: VecDeque::new(),
            priority,
            max_size,
        }
    }

    fn push(&mut self, request: R) -> PushResult {
        if self.requests.len() < self.max_size {
            self.requests.push_back(request);
            PushResult::Added
        } else {
            PushResult::Dropped
        }
    }

    fn pop(&mut self) -> R {
        self.requests.pop_front().expect("pop on empty fair queue entry")
    }
}

type SourceQuery<S> = Box<dyn Fn(&S) -> usize + Send>;

/// Bounded, weighted round-robin dispatcher over per-source FIFOs.
pub struct FairQueue<R, S: QueueSource> {
    queues: BTreeMap<S, Entry<R>>,
    /// Key of the source currently being served; `None` forces a seek.
    cursor: Option<S>,
    /// Items served from the cursor source since the last seek.
    counter: usize,
    last_cleanup: Instant,
    max_size_query: SourceQuery<S>,
    priority_query: SourceQuery<S>,
}

impl<R, S: QueueSource> FairQueue<R, S> {
    /// Creates a queue with the given per-source capacity and priority
    /// callbacks. Both are consulted once, when a source's FIFO is
    /// first created.
    pub fn new(max_size_query: SourceQuery<S>, priority_query: SourceQuery<S>) -> Self {
        Self {
            queues: BTreeMap::new(),
            cursor: None,
            counter: 0,
            last_cleanup: Instant::now(),
            max_size_query,
            priority_query,
        }
    }

    /// Enqueues a request for a source.
    pub fn push(&mut self, request: R, source: S) -> PushResult {
        let entry = self.queues.entry(source.clone()).or_insert_with(|| {
            Entry::new((self.max_size_query)(&source), (self.priority_query)(&source))
        });
        entry.push(request)
    }

    /// Number of queued requests for one source.
    pub fn size(&self, source: &S) -> usize {
        self.queues.get(source).map_or(0, |entry| entry.requests.len())
    }

    /// Number of queued requests across all sources.
    pub fn total_size(&self) -> usize {
        self.queues.values().map(|entry| entry.requests.len()).sum()
    }

    /// Number of per-source FIFOs, including empty ones.
    pub fn queues_len(&self) -> usize {
        self.queues.len()
    }

    /// True when no source has a queued request.
    pub fn is_empty(&self) -> bool {
        self.queues.values().all(|entry| entry.requests.is_empty())
    }

    /// Drops all FIFOs.
    pub fn clear(&mut self) {
        self.queues.clear();
        self.cursor = None;
        self.counter = 0;
    }

    /// Pops the next request.
    ///
    /// Must not be called on an empty queue; callers check
    /// [`FairQueue::is_empty`] first.
    pub fn next(&mut self) -> (R, S) {
        debug_assert!(!self.is_empty(), "next() called on an empty fair queue");

        let should_seek = match &self.cursor {
            None => true,
            Some(key) => match self.queues.get(key) {
                None => true,
                Some(entry) => entry.requests.is_empty() || self.counter >= entry.priority,
            },
        };
        if should_seek {
            self.seek_next();
        }

        let key = self.cursor.clone().expect("cursor set after seek");
        let entry = self.queues.get_mut(&key).expect("cursor points at a live queue");
        self.counter += 1;
        (entry.pop(), key)
    }

    /// Pops up to `max_count` requests; shorter if the queue drains.
    pub fn next_batch(&mut self, max_count: usize) -> VecDeque<(R, S)> {
        let mut result = VecDeque::new();
        while !self.is_empty() && result.len() < max_count {
            result.push_back(self.next());
        }
        result
    }

    /// Erases FIFOs whose source is no longer alive. Runs at most once
    /// per `interval`; returns whether a sweep happened.
    pub fn periodic_cleanup(&mut self, interval: Duration) -> bool {
        if self.last_cleanup.elapsed() < interval {
            return false;
        }
        self.last_cleanup = Instant::now();

        // The cursor may point at an erased source; invalidate it
        self.cursor = None;
        self.counter = 0;
        self.queues.retain(|source, _| source.alive());
        true
    }

    /// Container size introspection.
    pub fn container_info(&self) -> ContainerInfo {
        ContainerInfo::default()
            .leaf("queues", self.queues.len(), std::mem::size_of::<S>())
            .leaf("total_size", self.total_size(), std::mem::size_of::<R>())
    }

    /// Advances the cursor to the next non-empty source, wrapping
    /// around, and resets the serve counter.
    fn seek_next(&mut self) {
        self.counter = 0;

        let next_key = match &self.cursor {
            Some(current) => self
                .queues
                .range::<S, _>((
                    std::ops::Bound::Excluded(current.clone()),
                    std::ops::Bound::Unbounded,
                ))
                .find(|(_, entry)| !entry.requests.is_empty())
                .map(|(key, _)| key.clone()),
            None => None,
        };

        self.cursor = next_key.or_else(|| {
            // Wrap to the first non-empty queue
            self.queues
                .iter()
                .find(|(_, entry)| !entry.requests.is_empty())
                .map(|(key, _)| key.clone())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
    struct TestSource(u8);

    impl QueueSource for TestSource {}

    fn queue() -> FairQueue<u32, TestSource> {
        FairQueue::new(Box::new(|_| 4), Box::new(|s| if s.0 == 0 { 2 } else { 1 }))
    }

    #[test]
    fn test_push_and_drain() {
        let mut queue = queue();
        assert!(queue.push(1, TestSource(0)).is_added());
        assert!(queue.push(2, TestSource(0)).is_added());
        assert_eq!(queue.total_size(), 2);
        assert_eq!(queue.next().0, 1);
        assert_eq!(queue.next().0, 2);
        assert!(queue.is_empty());
        // The empty FIFO survives until cleanup
        assert_eq!(queue.queues_len(), 1);
    }

    #[test]
    fn test_capacity_drop() {
        let mut queue = queue();
        for i in 0..4 {
            assert!(queue.push(i, TestSource(1)).is_added());
        }
        assert_eq!(queue.push(99, TestSource(1)), PushResult::Dropped);
        assert_eq!(queue.size(&TestSource(1)), 4);
    }

    #[test]
    fn test_round_robin_respects_priority() {
        let mut queue = queue();
        for i in 0..4 {
            queue.push(i, TestSource(0));
            queue.push(100 + i, TestSource(1));
        }
        let order: Vec<u32> = queue.next_batch(8).into_iter().map(|(r, _)| r).collect();
        // Source 0 has priority 2, source 1 priority 1
        assert_eq!(order, vec![0, 1, 100, 2, 3, 101, 102, 103]);
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn test_next_on_empty_panics() {
        let mut queue = queue();
        let _ = queue.next();
    }
}
